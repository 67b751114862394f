//! Process-local tier backed by an N-way sharded map
//!
//! Second in-process store. Each shard owns its own `RwLock`, so reads on
//! different shards never contend. Power-of-2 shard count enables fast
//! modulo via bitwise AND.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use super::{fx_hash, Backend, CacheHit};
use crate::config::LocalTierConfig;
use crate::envelope::{epoch_now, expiry_from_ttl};
use crate::tier::Tier;

/// Number of shards; power of 2
const SHARD_COUNT: usize = 64;

#[derive(Clone)]
struct StoredEntry {
    expires: u64,
    value: Bytes,
}

impl StoredEntry {
    fn is_expired(&self) -> bool {
        self.expires != 0 && epoch_now() > self.expires
    }

    fn remaining_ttl(&self) -> Option<Duration> {
        (self.expires != 0)
            .then(|| Duration::from_secs(self.expires.saturating_sub(epoch_now())))
    }
}

/// Single shard: a locked map plus its own counters
struct Shard {
    map: RwLock<HashMap<String, StoredEntry>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl Shard {
    fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }
}

/// Process-local sharded-map tier
pub struct ShardedBackend {
    shards: Vec<Shard>,
    prefix: String,
}

impl ShardedBackend {
    /// Create a new sharded backend
    pub fn new(config: LocalTierConfig) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Shard::new()).collect(),
            prefix: config.key_prefix,
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    #[inline]
    fn shard_for(&self, full_key: &str) -> &Shard {
        let idx = (fx_hash(full_key.as_bytes()) as usize) & (SHARD_COUNT - 1);
        &self.shards[idx]
    }

    /// Total live entries across all shards
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.map.read().len()).sum()
    }

    /// Whether every shard is empty
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.map.read().is_empty())
    }

    /// Total reads across all shards
    pub fn total_reads(&self) -> u64 {
        self.shards.iter().map(|s| s.reads.load(Ordering::Relaxed)).sum()
    }

    /// Total writes across all shards
    pub fn total_writes(&self) -> u64 {
        self.shards.iter().map(|s| s.writes.load(Ordering::Relaxed)).sum()
    }
}

#[async_trait]
impl Backend for ShardedBackend {
    fn tier(&self) -> Tier {
        Tier::Sharded
    }

    async fn get(&self, key: &str) -> Option<CacheHit> {
        let full = self.full_key(key);
        let shard = self.shard_for(&full);
        shard.reads.fetch_add(1, Ordering::Relaxed);

        let entry = shard.map.read().get(&full).cloned();
        match entry {
            Some(entry) if entry.is_expired() => {
                shard.map.write().remove(&full);
                None
            }
            Some(entry) => Some(CacheHit::with_ttl(
                entry.value.clone(),
                entry.remaining_ttl(),
            )),
            None => None,
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> bool {
        let full = self.full_key(key);
        let shard = self.shard_for(&full);
        shard.writes.fetch_add(1, Ordering::Relaxed);

        shard.map.write().insert(
            full,
            StoredEntry {
                expires: expiry_from_ttl(ttl),
                value: Bytes::copy_from_slice(value),
            },
        );
        true
    }

    async fn delete(&self, key: &str) -> bool {
        let full = self.full_key(key);
        let shard = self.shard_for(&full);
        shard.writes.fetch_add(1, Ordering::Relaxed);
        shard.map.write().remove(&full);
        true
    }

    async fn clear(&self) -> bool {
        for shard in &self.shards {
            shard.map.write().clear();
        }
        true
    }
}

// =============================================================================
// Tests
// =============================================================================
