//! Multi-tier cache engine
//!
//! Owns the adapter table, the tier manager, the connection pool, and the
//! counters. Reads walk the available tiers in priority order and promote a
//! hit into every faster tier; writes fan out to all available tiers. Tier
//! failures degrade the chain, they never surface to the caller as errors.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::backend::{
    Backend, BackendSet, CacheHit, FileBackend, MemcachedBackend, MmapBackend, ProcessBackend,
    RedisBackend, ShardedBackend, ShmBackend, SnippetBackend,
};
use crate::config::CacheConfig;
use crate::error::Error;
use crate::manager::{TierManager, TierStatus};
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::pool::{ConnectionPool, PoolStats};
use crate::tier::Tier;

/// Combined engine health report
#[derive(Debug, Clone)]
pub struct EngineStatus {
    /// Per-tier health, in priority order
    pub tiers: Vec<TierStatus>,
    /// Connection pool occupancy for the networked tiers
    pub pools: Vec<PoolStats>,
    /// Tier that served the most recent successful operation
    pub last_tier: Option<Tier>,
    /// Most recent recorded failure, if any
    pub last_error: Option<String>,
}

/// The tiered cache engine
///
/// One owned instance per consumer; clone the surrounding `Arc` to share it.
pub struct CacheEngine {
    backends: Arc<BackendSet>,
    manager: TierManager,
    pool: Arc<ConnectionPool>,
    metrics: EngineMetrics,
    default_ttl: Duration,
    promotion_ttl: Duration,
    last_tier: RwLock<Option<Tier>>,
    last_error: RwLock<Option<String>>,
}

/// Find the first candidate directory that can actually be written to
fn bootstrap_dir(candidates: &[PathBuf]) -> Result<PathBuf, Error> {
    for candidate in candidates {
        if std::fs::create_dir_all(candidate).is_err() {
            continue;
        }
        let probe = candidate.join(".write_probe");
        if std::fs::write(&probe, b"probe").is_ok() {
            let _ = std::fs::remove_file(&probe);
            return Ok(candidate.clone());
        }
    }
    Err(Error::ResourceInit(format!(
        "no writable cache directory among {} candidates",
        candidates.len()
    )))
}

impl CacheEngine {
    /// Construct every adapter the configuration allows and run the initial
    /// tier discovery
    ///
    /// Construction never fails: a tier whose adapter cannot be built is
    /// marked invalid with a diagnostic and the chain continues without it.
    pub async fn new(config: CacheConfig) -> Self {
        let mut invalid: Vec<(Tier, String)> = Vec::new();
        let mut backends: Vec<Arc<dyn Backend>> = Vec::new();
        let enabled = |tier: Tier| !config.disabled_tiers.contains(&tier);

        // Disk-backed tiers hang off one bootstrapped base directory.
        let base_dir = match bootstrap_dir(&config.file.candidates()) {
            Ok(dir) => Some(dir),
            Err(err) => {
                invalid.push((Tier::File, err.to_string()));
                None
            }
        };

        if enabled(Tier::Snippet) {
            let dir = config
                .snippet
                .dir
                .clone()
                .or_else(|| base_dir.as_ref().map(|d| d.join("snippets")));
            match dir {
                Some(dir) => match std::fs::create_dir_all(&dir) {
                    Ok(()) => backends.push(Arc::new(SnippetBackend::new(dir))),
                    Err(err) => invalid.push((Tier::Snippet, err.to_string())),
                },
                None => invalid.push((Tier::Snippet, "no snippet directory".to_string())),
            }
        }

        if enabled(Tier::Shm) {
            match ShmBackend::new(config.shm.dir.clone(), config.shm.segment_size) {
                Ok(backend) => backends.push(Arc::new(backend)),
                Err(err) => invalid.push((Tier::Shm, err.to_string())),
            }
        }

        if enabled(Tier::Process) {
            backends.push(Arc::new(ProcessBackend::new(config.process.clone())));
        }
        if enabled(Tier::Sharded) {
            backends.push(Arc::new(ShardedBackend::new(config.sharded.clone())));
        }

        if enabled(Tier::Mmap) {
            let dir = config
                .mmap
                .dir
                .clone()
                .or_else(|| base_dir.as_ref().map(|d| d.join("mmap")));
            match dir {
                Some(dir) => match MmapBackend::new(dir, config.mmap.default_file_size) {
                    Ok(backend) => backends.push(Arc::new(backend)),
                    Err(err) => invalid.push((Tier::Mmap, err.to_string())),
                },
                None => invalid.push((Tier::Mmap, "no mmap directory".to_string())),
            }
        }

        let pool = Arc::new(ConnectionPool::new());
        if enabled(Tier::Redis) {
            pool.configure(Tier::Redis, config.redis.clone(), config.pool.clone());
            pool.init(Tier::Redis).await;
            backends.push(Arc::new(RedisBackend::new(pool.clone(), &config.redis)));
        }
        if enabled(Tier::Memcached) {
            pool.configure(Tier::Memcached, config.memcached.clone(), config.pool.clone());
            pool.init(Tier::Memcached).await;
            backends.push(Arc::new(MemcachedBackend::new(
                pool.clone(),
                &config.memcached,
            )));
        }

        if enabled(Tier::File) {
            if let Some(dir) = &base_dir {
                backends.push(Arc::new(FileBackend::new(dir.clone())));
            }
        }

        let first_error = invalid.first().map(|(tier, reason)| {
            error!(tier = %tier, reason = %reason, "tier adapter unavailable");
            format!("{tier}: {reason}")
        });

        let backends = Arc::new(BackendSet::new(backends));
        let manager = TierManager::new(backends.clone(), config.probe_ttl, invalid);
        let engine = Self {
            backends,
            manager,
            pool,
            metrics: EngineMetrics::new(),
            default_ttl: config.default_ttl,
            promotion_ttl: config.promotion_ttl,
            last_tier: RwLock::new(None),
            last_error: RwLock::new(first_error),
        };

        let tiers = engine.manager.discover(false).await;
        info!(?tiers, "cache engine ready");
        engine
    }

    fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write() = Some(message.into());
    }

    /// Read a key, walking the available tiers fastest-first
    ///
    /// A hit is copied into every faster available tier before returning.
    /// The copy keeps the entry's remaining lifetime when the source tier
    /// reports one, otherwise the configured promotion TTL.
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        let available = self.manager.discover(false).await;
        for (idx, tier) in available.iter().enumerate() {
            let Some(backend) = self.backends.get(*tier) else {
                continue;
            };
            match backend.get(key).await {
                Some(hit) => {
                    self.metrics.record_hit(*tier);
                    *self.last_tier.write() = Some(*tier);
                    debug!(key, tier = %tier, "cache hit");
                    self.promote(key, &hit, &available[..idx]).await;
                    return Some(hit.value);
                }
                None => self.metrics.record_miss(*tier),
            }
        }
        debug!(key, "cache miss");
        None
    }

    /// Copy a hit into faster tiers
    async fn promote(&self, key: &str, hit: &CacheHit, targets: &[Tier]) {
        if targets.is_empty() {
            return;
        }
        let ttl = hit.remaining_ttl.unwrap_or(self.promotion_ttl);
        for tier in targets {
            let Some(backend) = self.backends.get(*tier) else {
                continue;
            };
            if backend.set(key, &hit.value, Some(ttl)).await {
                self.metrics.record_promotion(*tier);
                debug!(key, tier = %tier, ttl_secs = ttl.as_secs(), "promoted entry");
            }
        }
    }

    /// Write a key to every available tier
    ///
    /// Succeeds when at least one tier accepted the write. Empty values are
    /// refused outright: an empty payload is indistinguishable from a miss
    /// in several tiers.
    pub async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> bool {
        if value.is_empty() {
            warn!(key, "refusing to cache empty value");
            return false;
        }
        let ttl = Some(ttl.unwrap_or(self.default_ttl));
        let available = self.manager.discover(false).await;
        let mut stored: Option<Tier> = None;
        for tier in &available {
            let Some(backend) = self.backends.get(*tier) else {
                continue;
            };
            if backend.set(key, value, ttl).await {
                stored.get_or_insert(*tier);
            } else {
                self.manager
                    .record_error(*tier, format!("write failed for key '{key}'"));
            }
        }
        match stored {
            Some(tier) => {
                self.metrics.record_set();
                *self.last_tier.write() = Some(tier);
                true
            }
            None => {
                self.record_error(format!("no tier accepted write for key '{key}'"));
                false
            }
        }
    }

    /// Delete a key from every available tier
    ///
    /// Succeeds only when every tier confirmed; a missing key still counts
    /// as confirmed.
    pub async fn delete(&self, key: &str) -> bool {
        let available = self.manager.discover(false).await;
        let mut all = true;
        for tier in &available {
            if let Some(backend) = self.backends.get(*tier) {
                all &= backend.delete(key).await;
            }
        }
        if all {
            self.metrics.record_delete();
        }
        all
    }

    /// Clear every available tier
    pub async fn clear(&self) -> bool {
        let available = self.manager.discover(false).await;
        let mut all = true;
        for tier in &available {
            if let Some(backend) = self.backends.get(*tier) {
                all &= backend.clear().await;
            }
        }
        if all {
            self.metrics.record_clear();
        }
        all
    }

    /// Sweep expired entries from the tiers that cannot expire on their own
    pub async fn cleanup_expired(&self) -> usize {
        let available = self.manager.discover(false).await;
        let mut removed = 0;
        for tier in &available {
            if tier.has_native_ttl() {
                continue;
            }
            if let Some(backend) = self.backends.get(*tier) {
                removed += backend.cleanup_expired().await;
            }
        }
        if removed > 0 {
            self.metrics.record_sweep(removed);
            info!(removed, "expired entry sweep complete");
        }
        removed
    }

    /// Read directly from one tier, without promotion
    pub async fn get_from(&self, tier: Tier, key: &str) -> Option<CacheHit> {
        if !self.manager.is_available(tier).await {
            return None;
        }
        let backend = self.backends.get(tier)?;
        match backend.get(key).await {
            Some(hit) => {
                self.metrics.record_hit(tier);
                Some(hit)
            }
            None => {
                self.metrics.record_miss(tier);
                None
            }
        }
    }

    /// Write directly to one tier
    pub async fn set_to(&self, tier: Tier, key: &str, value: &[u8], ttl: Option<Duration>) -> bool {
        if value.is_empty() {
            warn!(key, tier = %tier, "refusing to cache empty value");
            return false;
        }
        if !self.manager.is_available(tier).await {
            return false;
        }
        let Some(backend) = self.backends.get(tier) else {
            return false;
        };
        let ok = backend
            .set(key, value, Some(ttl.unwrap_or(self.default_ttl)))
            .await;
        if ok {
            *self.last_tier.write() = Some(tier);
        }
        ok
    }

    /// Delete directly from one tier
    pub async fn delete_from(&self, tier: Tier, key: &str) -> bool {
        if !self.manager.is_available(tier).await {
            return false;
        }
        match self.backends.get(tier) {
            Some(backend) => backend.delete(key).await,
            None => false,
        }
    }

    /// Read with a caller-supplied tier preference
    ///
    /// Preferred tiers are tried in the given order before the normal
    /// priority walk; a hit promotes exactly as `get` does.
    pub async fn get_with_preference(&self, key: &str, preferred: &[Tier]) -> Option<Bytes> {
        for tier in preferred {
            if let Some(hit) = self.get_from(*tier, key).await {
                *self.last_tier.write() = Some(*tier);
                let available = self.manager.discover(false).await;
                let faster: Vec<Tier> = available
                    .into_iter()
                    .filter(|t| t.priority() < tier.priority())
                    .collect();
                self.promote(key, &hit, &faster).await;
                return Some(hit.value);
            }
        }
        self.get(key).await
    }

    /// Ordered list of currently-available tiers
    pub async fn available_tiers(&self) -> Vec<Tier> {
        self.manager.discover(false).await
    }

    /// Re-run discovery, optionally ignoring cached probe results
    pub async fn discover(&self, force: bool) -> Vec<Tier> {
        self.manager.discover(force).await
    }

    /// Probe one tier right now
    pub async fn probe(&self, tier: Tier) -> bool {
        self.manager.probe(tier).await
    }

    /// Cached availability of one tier
    pub async fn is_available(&self, tier: Tier) -> bool {
        self.manager.is_available(tier).await
    }

    /// Highest-priority available tier
    pub async fn highest_priority_tier(&self) -> Option<Tier> {
        self.manager.highest_priority().await
    }

    /// Lowest-priority available tier
    pub async fn lowest_priority_tier(&self) -> Option<Tier> {
        self.manager.lowest_priority().await
    }

    /// Full health report
    pub async fn status(&self) -> EngineStatus {
        self.manager.discover(false).await;
        EngineStatus {
            tiers: self.manager.status(),
            pools: self.pool.stats(),
            last_tier: *self.last_tier.read(),
            last_error: self.last_error.read().clone(),
        }
    }

    /// Counter snapshot
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Pool occupancy for the networked tiers
    pub fn pool_stats(&self) -> Vec<PoolStats> {
        self.pool.stats()
    }

    /// Tier that served the most recent successful operation
    pub fn last_tier(&self) -> Option<Tier> {
        *self.last_tier.read()
    }

    /// Most recent recorded failure
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Evict stale pooled connections
    pub async fn pool_cleanup(&self) {
        self.pool.cleanup().await;
    }

    /// Drop every pooled connection
    pub fn shutdown(&self) {
        self.pool.close_all();
        info!("cache engine shut down");
    }
}

// =============================================================================
// Tests
// =============================================================================
