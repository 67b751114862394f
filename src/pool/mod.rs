//! Bounded connection pool for networked tiers
//!
//! Per backend: a set of checked-out (active) connections tracked by id and
//! a list of parked (idle) connections. Acquire health-checks idle
//! connections before reuse; beyond the hard cap, callers get `None` and
//! treat the tier as unavailable for that call. No pool method propagates
//! an error.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{NetTierConfig, PoolConfig};
use crate::tier::Tier;

mod connection;

pub use connection::{AsciiConnection, NetConnection, RespConnection, RespValue};

/// One pooled connection with its bookkeeping
pub struct PooledConnection {
    /// Stable id, used by the active-set bookkeeping
    pub id: Uuid,
    /// When the TCP connection was established
    pub created: Instant,
    /// Last time the connection finished an exchange
    pub last_used: Instant,
    /// The wire client itself
    pub conn: NetConnection,
}

impl PooledConnection {
    fn new(conn: NetConnection) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            created: now,
            last_used: now,
            conn,
        }
    }
}

struct ActiveMeta {
    #[allow(dead_code)]
    created: Instant,
    checked_out: Instant,
}

struct PoolState {
    net: NetTierConfig,
    config: PoolConfig,
    idle: Mutex<VecDeque<PooledConnection>>,
    active: DashMap<Uuid, ActiveMeta>,
    // Connections counted against the cap while in neither `active` nor
    // `idle`: in-flight connect attempts and handles drained by `cleanup`.
    // Without this, a concurrent reserve undercounts the pool and admits
    // connections past `max_connections`.
    in_transit: std::sync::atomic::AtomicUsize,
}

impl PoolState {
    fn total(&self) -> usize {
        self.active.len()
            + self.idle.lock().len()
            + self.in_transit.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn try_reserve(&self) -> bool {
        use std::sync::atomic::Ordering;
        self.in_transit.fetch_add(1, Ordering::SeqCst);
        if self.active.len() + self.idle.lock().len() + self.in_transit.load(Ordering::SeqCst)
            > self.config.max_connections
        {
            self.in_transit.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }

    fn unreserve(&self) {
        self.in_transit
            .fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
    }
}

/// Pool statistics for one backend
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// Which backend
    pub tier: Tier,
    /// Checked-out connections
    pub active: usize,
    /// Parked connections
    pub idle: usize,
    /// Configured hard cap
    pub max_connections: usize,
    /// Configured floor, pre-created at init
    pub min_connections: usize,
}

/// Bounded active/idle connection pool, keyed by networked tier
pub struct ConnectionPool {
    states: DashMap<Tier, Arc<PoolState>>,
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionPool {
    /// Create an empty pool; backends are added via `configure`
    pub fn new() -> Self {
        Self {
            states: DashMap::new(),
        }
    }

    /// Register or replace the configuration for one backend
    pub fn configure(&self, tier: Tier, net: NetTierConfig, config: PoolConfig) {
        self.states.insert(
            tier,
            Arc::new(PoolState {
                net,
                config,
                idle: Mutex::new(VecDeque::new()),
                active: DashMap::new(),
                in_transit: std::sync::atomic::AtomicUsize::new(0),
            }),
        );
    }

    fn state(&self, tier: Tier) -> Option<Arc<PoolState>> {
        self.states.get(&tier).map(|s| s.clone())
    }

    async fn connect(state: &PoolState, tier: Tier) -> Option<NetConnection> {
        let addr = format!("{}:{}", state.net.host, state.net.port);
        for attempt in 0..state.config.connect_attempts {
            if attempt > 0 {
                tokio::time::sleep(state.config.retry_delay).await;
            }
            let result = match tier {
                Tier::Redis => RespConnection::connect(
                    &addr,
                    state.config.connect_timeout,
                    state.net.read_timeout,
                    state.net.password.as_deref(),
                )
                .await
                .map(NetConnection::Redis),
                Tier::Memcached => AsciiConnection::connect(
                    &addr,
                    state.config.connect_timeout,
                    state.net.read_timeout,
                )
                .await
                .map(NetConnection::Memcached),
                other => {
                    warn!(tier = %other, "pool asked for a non-networked tier");
                    return None;
                }
            };
            match result {
                Ok(conn) => return Some(conn),
                Err(err) => {
                    debug!(tier = %tier, attempt, %err, "connect attempt failed");
                }
            }
        }
        None
    }

    /// Pre-create the configured minimum of connections for one backend
    pub async fn init(&self, tier: Tier) {
        let Some(state) = self.state(tier) else {
            return;
        };
        while state.total() < state.config.min_connections {
            if !state.try_reserve() {
                break;
            }
            let connected = Self::connect(&state, tier).await;
            let stop = match connected {
                Some(conn) => {
                    state.idle.lock().push_back(PooledConnection::new(conn));
                    false
                }
                None => true,
            };
            state.unreserve();
            if stop {
                break;
            }
        }
    }

    /// Check out a healthy connection, or `None` when the backend is
    /// unreachable or the pool is at its cap
    pub async fn acquire(&self, tier: Tier) -> Option<PooledConnection> {
        let state = self.state(tier)?;

        // Idle connections first; drop the ones that fail their health check.
        // Pop and register as active under the idle lock, so the handle is
        // counted somewhere at every instant; a concurrent acquire never
        // undercounts the pool while the ping is in flight.
        loop {
            let candidate = {
                let mut idle = state.idle.lock();
                let conn = idle.pop_front();
                if let Some(conn) = &conn {
                    state.active.insert(
                        conn.id,
                        ActiveMeta {
                            created: conn.created,
                            checked_out: Instant::now(),
                        },
                    );
                }
                conn
            };
            let Some(mut conn) = candidate else {
                break;
            };
            if conn.conn.ping().await {
                return Some(conn);
            }
            state.active.remove(&conn.id);
            debug!(tier = %tier, id = %conn.id, "dropping unhealthy idle connection");
        }

        // Nothing idle: create fresh while under the cap. The reservation
        // holds the slot across the connect await.
        if !state.try_reserve() {
            debug!(tier = %tier, "pool at capacity");
            return None;
        }
        let connected = Self::connect(&state, tier).await;
        let conn = match connected {
            Some(conn) => PooledConnection::new(conn),
            None => {
                state.unreserve();
                return None;
            }
        };
        state.active.insert(
            conn.id,
            ActiveMeta {
                created: conn.created,
                checked_out: Instant::now(),
            },
        );
        state.unreserve();
        Some(conn)
    }

    /// Return a connection after use
    ///
    /// Parked only while idle holds fewer than `max_connections / 2`
    /// entries; otherwise the connection is closed immediately.
    pub fn release(&self, tier: Tier, mut conn: PooledConnection) {
        let Some(state) = self.state(tier) else {
            return;
        };
        // Unregister and park under the idle lock, so no concurrent acquire
        // or reservation observes the handle out of both sets.
        let mut idle = state.idle.lock();
        state.active.remove(&conn.id);
        if idle.len() < state.config.max_connections / 2 {
            conn.last_used = Instant::now();
            idle.push_back(conn);
        }
        // else: dropped after the lock, closing the socket
    }

    /// Close a connection without parking it (after a transport failure)
    pub fn discard(&self, tier: Tier, conn: PooledConnection) {
        if let Some(state) = self.state(tier) {
            state.active.remove(&conn.id);
        }
    }

    /// Evict idle connections past the idle timeout or failing their
    /// liveness probe, and drop bookkeeping for leaked active entries
    pub async fn cleanup(&self) {
        for entry in self.states.iter() {
            let (tier, state) = (*entry.key(), entry.value().clone());
            let idle_timeout = state.config.idle_timeout;

            let parked: Vec<PooledConnection> = state.idle.lock().drain(..).collect();
            // Drained handles stay counted against the cap while probed
            let drained = parked.len();
            state
                .in_transit
                .fetch_add(drained, std::sync::atomic::Ordering::SeqCst);
            let mut kept = VecDeque::new();
            for mut conn in parked {
                if conn.last_used.elapsed() > idle_timeout {
                    debug!(tier = %tier, id = %conn.id, "evicting idle connection past timeout");
                    continue;
                }
                if !conn.conn.ping().await {
                    debug!(tier = %tier, id = %conn.id, "evicting idle connection failing probe");
                    continue;
                }
                kept.push_back(conn);
            }
            let mut idle = state.idle.lock();
            for conn in kept {
                idle.push_back(conn);
            }
            drop(idle);
            state
                .in_transit
                .fetch_sub(drained, std::sync::atomic::Ordering::SeqCst);

            // A handle checked out far past the idle timeout is leaked; its
            // socket died with whatever leaked it
            state
                .active
                .retain(|_, meta| meta.checked_out.elapsed() <= idle_timeout * 4);
        }
    }

    /// Drop every pooled connection and all bookkeeping
    pub fn close_all(&self) {
        for entry in self.states.iter() {
            entry.value().idle.lock().clear();
            entry.value().active.clear();
        }
    }

    /// Per-backend statistics
    pub fn stats(&self) -> Vec<PoolStats> {
        self.states
            .iter()
            .map(|entry| {
                let state = entry.value();
                PoolStats {
                    tier: *entry.key(),
                    active: state.active.len(),
                    idle: state.idle.lock().len(),
                    max_connections: state.config.max_connections,
                    min_connections: state.config.min_connections,
                }
            })
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Fake RESP server that answers PONG to everything, forever
    async fn pong_server() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (mut sock, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    while let Ok(n) = sock.read(&mut buf).await {
                        if n == 0 {
                            break;
                        }
                        if sock.write_all(b"+PONG\r\n").await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        addr
    }

    /// Fake RESP server answering PONG after a fixed delay, forever
    async fn slow_pong_server(delay: Duration) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (mut sock, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    while let Ok(n) = sock.read(&mut buf).await {
                        if n == 0 {
                            break;
                        }
                        tokio::time::sleep(delay).await;
                        if sock.write_all(b"+PONG\r\n").await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        addr
    }

    fn net_config(addr: std::net::SocketAddr) -> NetTierConfig {
        NetTierConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            password: None,
            key_prefix: "t:".into(),
            read_timeout: Duration::from_millis(500),
        }
    }

    fn pool_config(max: usize) -> PoolConfig {
        PoolConfig {
            min_connections: 0,
            max_connections: max,
            idle_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_millis(500),
            connect_attempts: 1,
            retry_delay: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_acquire_release_reuse() {
        let addr = pong_server().await;
        let pool = ConnectionPool::new();
        pool.configure(Tier::Redis, net_config(addr), pool_config(4));

        let conn = pool.acquire(Tier::Redis).await.unwrap();
        let id = conn.id;
        pool.release(Tier::Redis, conn);

        // Healthy idle connection is reused, not replaced
        let again = pool.acquire(Tier::Redis).await.unwrap();
        assert_eq!(again.id, id);
        pool.release(Tier::Redis, again);
    }

    #[tokio::test]
    async fn test_cap_is_enforced() {
        let addr = pong_server().await;
        let pool = ConnectionPool::new();
        pool.configure(Tier::Redis, net_config(addr), pool_config(2));

        let a = pool.acquire(Tier::Redis).await.unwrap();
        let b = pool.acquire(Tier::Redis).await.unwrap();
        assert!(pool.acquire(Tier::Redis).await.is_none());

        pool.release(Tier::Redis, a);
        pool.release(Tier::Redis, b);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_never_exceeds_max() {
        let addr = pong_server().await;
        let pool = Arc::new(ConnectionPool::new());
        pool.configure(Tier::Redis, net_config(addr), pool_config(3));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let pool = pool.clone();
            handles.push(tokio::spawn(
                async move { pool.acquire(Tier::Redis).await },
            ));
        }
        let mut granted = Vec::new();
        for handle in handles {
            if let Some(conn) = handle.await.unwrap() {
                granted.push(conn);
            }
        }
        assert!(granted.len() <= 3, "granted {} connections", granted.len());

        let stats = &pool.stats()[0];
        assert!(stats.active + stats.idle <= 3);
        for conn in granted {
            pool.release(Tier::Redis, conn);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_slow_health_check_keeps_cap_under_race() {
        let addr = slow_pong_server(Duration::from_millis(50)).await;
        let pool = Arc::new(ConnectionPool::new());
        pool.configure(Tier::Redis, net_config(addr), pool_config(2));

        // Park one idle connection so racing acquires health-check it while
        // also attempting fresh connects.
        let seed = pool.acquire(Tier::Redis).await.unwrap();
        pool.release(Tier::Redis, seed);

        let mut handles = Vec::new();
        for _ in 0..3 {
            let pool = pool.clone();
            handles.push(tokio::spawn(
                async move { pool.acquire(Tier::Redis).await },
            ));
        }
        let mut granted = Vec::new();
        for handle in handles {
            if let Some(conn) = handle.await.unwrap() {
                granted.push(conn);
            }
        }

        assert!(granted.len() <= 2, "granted {} connections", granted.len());
        let stats = &pool.stats()[0];
        assert!(
            stats.active + stats.idle <= 2,
            "pool holds {} connections past the cap of 2",
            stats.active + stats.idle
        );
        for conn in granted {
            pool.release(Tier::Redis, conn);
        }
    }

    #[tokio::test]
    async fn test_idle_capped_at_half_max() {
        let addr = pong_server().await;
        let pool = ConnectionPool::new();
        pool.configure(Tier::Redis, net_config(addr), pool_config(4));

        let conns: Vec<_> = futures::future::join_all(
            (0..4).map(|_| pool.acquire(Tier::Redis)),
        )
        .await
        .into_iter()
        .flatten()
        .collect();
        assert_eq!(conns.len(), 4);

        for conn in conns {
            pool.release(Tier::Redis, conn);
        }
        // max/2 = 2 parked, the rest closed on release
        assert_eq!(pool.stats()[0].idle, 2);
        assert_eq!(pool.stats()[0].active, 0);
    }

    #[tokio::test]
    async fn test_unreachable_backend_yields_none() {
        let pool = ConnectionPool::new();
        let mut net = net_config("127.0.0.1:1".parse().unwrap());
        net.read_timeout = Duration::from_millis(100);
        pool.configure(Tier::Redis, net, pool_config(2));

        assert!(pool.acquire(Tier::Redis).await.is_none());
    }

    #[tokio::test]
    async fn test_init_precreates_min_connections() {
        let addr = pong_server().await;
        let pool = ConnectionPool::new();
        let mut config = pool_config(4);
        config.min_connections = 2;
        pool.configure(Tier::Redis, net_config(addr), config);

        pool.init(Tier::Redis).await;
        assert_eq!(pool.stats()[0].idle, 2);
    }

    #[tokio::test]
    async fn test_cleanup_evicts_stale_idle() {
        let addr = pong_server().await;
        let pool = ConnectionPool::new();
        let mut config = pool_config(4);
        config.idle_timeout = Duration::from_millis(0);
        pool.configure(Tier::Redis, net_config(addr), config);

        let conn = pool.acquire(Tier::Redis).await.unwrap();
        pool.release(Tier::Redis, conn);
        assert_eq!(pool.stats()[0].idle, 1);

        pool.cleanup().await;
        assert_eq!(pool.stats()[0].idle, 0);
    }

    #[tokio::test]
    async fn test_close_all() {
        let addr = pong_server().await;
        let pool = ConnectionPool::new();
        pool.configure(Tier::Redis, net_config(addr), pool_config(4));

        let conn = pool.acquire(Tier::Redis).await.unwrap();
        pool.release(Tier::Redis, conn);
        pool.close_all();

        let stats = &pool.stats()[0];
        assert_eq!(stats.active + stats.idle, 0);
    }
}
