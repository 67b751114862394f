//! Memcached-like networked tier
//!
//! ASCII-protocol sibling of the Redis-like tier; identical degradation
//! rules. TTLs map to the protocol's `exptime` field (0 = never).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use super::{Backend, CacheHit};
use crate::config::NetTierConfig;
use crate::pool::{ConnectionPool, NetConnection, PooledConnection};
use crate::tier::Tier;

/// Memcached-like tier adapter
pub struct MemcachedBackend {
    pool: Arc<ConnectionPool>,
    prefix: String,
}

impl MemcachedBackend {
    /// Create over a configured pool
    pub fn new(pool: Arc<ConnectionPool>, config: &NetTierConfig) -> Self {
        Self {
            pool,
            prefix: config.key_prefix.clone(),
        }
    }

    fn full_key(&self, key: &str) -> String {
        // The ASCII protocol forbids spaces and control bytes in keys; a
        // stray CR/LF would corrupt the line framing
        format!("{}{}", self.prefix, key)
            .chars()
            .map(|c| {
                if c == ' ' || c.is_ascii_control() {
                    '_'
                } else {
                    c
                }
            })
            .collect()
    }

    async fn checkout(&self) -> Option<PooledConnection> {
        self.pool.acquire(Tier::Memcached).await
    }

    fn settle<T>(&self, conn: PooledConnection, result: crate::Result<T>) -> Option<T> {
        match result {
            Ok(value) => {
                self.pool.release(Tier::Memcached, conn);
                Some(value)
            }
            Err(err) => {
                debug!(tier = "memcached", %err, "dropping connection after failure");
                self.pool.discard(Tier::Memcached, conn);
                None
            }
        }
    }
}

#[async_trait]
impl Backend for MemcachedBackend {
    fn tier(&self) -> Tier {
        Tier::Memcached
    }

    async fn get(&self, key: &str) -> Option<CacheHit> {
        let mut conn = self.checkout().await?;
        let NetConnection::Memcached(client) = &mut conn.conn else {
            self.pool.discard(Tier::Memcached, conn);
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
        let NetConnection::Memcached(client) = &mut conn.conn else {
            self.pool.discard(Tier::Memcached, conn);
            return false;
        };
        let exptime = ttl.map(|t| t.as_secs().max(1)).unwrap_or(0);
        let result = client.set(&self.full_key(key), value, exptime).await;
        self.settle(conn, result).is_some()
    }

    async fn delete(&self, key: &str) -> bool {
        let Some(mut conn) = self.checkout().await else {
            return false;
        };
        let NetConnection::Memcached(client) = &mut conn.conn else {
            self.pool.discard(Tier::Memcached, conn);
            return false;
        };
        let result = client.delete(&self.full_key(key)).await.map(|_| ());
        self.settle(conn, result).is_some()
    }

    async fn clear(&self) -> bool {
        let Some(mut conn) = self.checkout().await else {
            return false;
        };
        let NetConnection::Memcached(client) = &mut conn.conn else {
            self.pool.discard(Tier::Memcached, conn);
            return false;
        };
        let result = client.flush_all().await;
        self.settle(conn, result).is_some()
    }
}

// =============================================================================
// Tests
// =============================================================================
