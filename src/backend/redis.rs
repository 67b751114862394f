//! Redis-like networked tier
//!
//! All traffic goes through the connection pool. A transport failure drops
//! the pooled handle and degrades to a miss/`false` for this tier only; the
//! engine falls through to the next tier.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use super::{Backend, CacheHit};
use crate::config::NetTierConfig;
use crate::pool::{ConnectionPool, NetConnection, PooledConnection};
use crate::tier::Tier;

/// Redis-like tier adapter
pub struct RedisBackend {
    pool: Arc<ConnectionPool>,
    prefix: String,
}

impl RedisBackend {
    /// Create over a configured pool
    pub fn new(pool: Arc<ConnectionPool>, config: &NetTierConfig) -> Self {
        Self {
            pool,
            prefix: config.key_prefix.clone(),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    async fn checkout(&self) -> Option<PooledConnection> {
        self.pool.acquire(Tier::Redis).await
    }

    fn settle<T>(&self, conn: PooledConnection, result: crate::Result<T>) -> Option<T> {
        match result {
            Ok(value) => {
                self.pool.release(Tier::Redis, conn);
                Some(value)
            }
            Err(err) => {
                debug!(tier = "redis", %err, "dropping connection after failure");
                self.pool.discard(Tier::Redis, conn);
                None
            }
        }
    }
}

#[async_trait]
impl Backend for RedisBackend {
    fn tier(&self) -> Tier {
        Tier::Redis
    }

    async fn get(&self, key: &str) -> Option<CacheHit> {
        let mut conn = self.checkout().await?;
        let NetConnection::Redis(client) = &mut conn.conn else {
            self.pool.discard(Tier::Redis, conn);
            return None;
        };
        let result = client.get(&self.full_key(key)).await;
        self.settle(conn, result)?
            .map(|bytes| CacheHit::with_ttl(Bytes::from(bytes), None))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> bool {
        let Some(mut conn) = self.checkout().await else {
            return false;
        };
        let NetConnection::Redis(client) = &mut conn.conn else {
            self.pool.discard(Tier::Redis, conn);
            return false;
        };
        let result = client
            .set(&self.full_key(key), value, ttl.map(|t| t.as_secs().max(1)))
            .await;
        self.settle(conn, result).is_some()
    }

    async fn delete(&self, key: &str) -> bool {
        let Some(mut conn) = self.checkout().await else {
            return false;
        };
        let NetConnection::Redis(client) = &mut conn.conn else {
            self.pool.discard(Tier::Redis, conn);
            return false;
        };
        // DEL of a missing key reports 0; both outcomes count as success
        let result = client.del(&self.full_key(key)).await.map(|_| ());
        self.settle(conn, result).is_some()
    }

    async fn clear(&self) -> bool {
        let Some(mut conn) = self.checkout().await else {
            return false;
        };
        let NetConnection::Redis(client) = &mut conn.conn else {
            self.pool.discard(Tier::Redis, conn);
            return false;
        };
        let result = client.flush_db().await;
        self.settle(conn, result).is_some()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Fake server, scripted one reply per exchange after the PING from
    /// pool acquisition (which is not sent on fresh connects)
    async fn scripted_server(replies: Vec<&'static [u8]>) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (mut sock, _) = listener.accept().await.unwrap();
                let replies = replies.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let mut script = replies.into_iter();
                    while let Ok(n) = sock.read(&mut buf).await {
                        if n == 0 {
                            break;
                        }
                        // PING (from pool health checks) answered out of band
                        let reply: &[u8] = if buf[..n].windows(4).any(|w| w == b"PING") {
                            b"+PONG\r\n"
                        } else {
                            match script.next() {
                                Some(r) => r,
                                None => break,
                            }
                        };
                        if sock.write_all(reply).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        addr
    }

    fn backend_for(addr: std::net::SocketAddr) -> RedisBackend {
        let net = NetTierConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            password: None,
            key_prefix: "sc:".into(),
            read_timeout: Duration::from_millis(500),
        };
        let pool = Arc::new(ConnectionPool::new());
        pool.configure(
            Tier::Redis,
            net.clone(),
            PoolConfig {
                connect_attempts: 1,
                connect_timeout: Duration::from_millis(500),
                ..Default::default()
            },
        );
        RedisBackend::new(pool, &net)
    }

    #[tokio::test]
    async fn test_get_hit() {
        let addr = scripted_server(vec![b"$5\r\nhello\r\n"]).await;
        let b = backend_for(addr);

        let hit = b.get("k").await.unwrap();
        assert_eq!(hit.value.as_ref(), b"hello");
        // Networked tier cannot report a remaining TTL
        assert!(hit.remaining_ttl.is_none());
    }

    #[tokio::test]
    async fn test_get_miss() {
        let addr = scripted_server(vec![b"$-1\r\n"]).await;
        let b = backend_for(addr);
        assert!(b.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_set_delete_clear() {
        let addr = scripted_server(vec![b"+OK\r\n", b":0\r\n", b"+OK\r\n"]).await;
        let b = backend_for(addr);

        assert!(b.set("k", b"v", Some(Duration::from_secs(60))).await);
        // Deleting a missing key still succeeds
        assert!(b.delete("k").await);
        assert!(b.clear().await);
    }

    #[tokio::test]
    async fn test_unreachable_store_degrades() {
        let b = backend_for("127.0.0.1:1".parse().unwrap());
        assert!(b.get("k").await.is_none());
        assert!(!b.set("k", b"v", None).await);
        assert!(!b.delete("k").await);
        assert!(!b.test().await);
    }
}
