//! Backend adapters
//!
//! One adapter per tier, all behind the same async capability:
//! test / get / set / delete / clear. Adapters never propagate errors —
//! failures degrade to a miss or `false` and are logged; the engine decides
//! what that means for the chain.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::tier::Tier;

mod file;
mod memcached;
mod mmap;
mod process;
mod redis;
mod sharded;
mod shm;
mod snippet;

pub use file::FileBackend;
pub use memcached::MemcachedBackend;
pub use mmap::MmapBackend;
pub use process::ProcessBackend;
pub use redis::RedisBackend;
pub use sharded::ShardedBackend;
pub use shm::ShmBackend;
pub use snippet::SnippetBackend;

/// A successful read from one tier
#[derive(Debug, Clone)]
pub struct CacheHit {
    /// The cached bytes
    pub value: Bytes,
    /// Remaining lifetime, when the tier can report one; promotion copies
    /// preserve it
    pub remaining_ttl: Option<Duration>,
}

impl CacheHit {
    /// Hit with a known remaining lifetime
    pub fn with_ttl(value: Bytes, remaining_ttl: Option<Duration>) -> Self {
        Self {
            value,
            remaining_ttl,
        }
    }
}

/// Uniform tier capability
///
/// `test` defaults to a functional probe: an actual write/read/verify/delete
/// of a throwaway key, not a presence check.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Which tier this adapter serves
    fn tier(&self) -> Tier;

    /// Short stable name, used in logs and stats
    fn name(&self) -> &'static str {
        self.tier().name()
    }

    /// Read one key; `None` is a miss (including corrupt or expired payloads)
    async fn get(&self, key: &str) -> Option<CacheHit>;

    /// Write one key; `false` means this tier rejected or failed the write
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> bool;

    /// Delete one key; deleting a missing key counts as success
    async fn delete(&self, key: &str) -> bool;

    /// Bulk clear of everything this tier holds
    async fn clear(&self) -> bool;

    /// Sweep expired entries; tiers with native TTL have nothing to do
    async fn cleanup_expired(&self) -> usize {
        0
    }

    /// Functional availability probe
    async fn test(&self) -> bool {
        let key = format!("__probe:{}", uuid::Uuid::new_v4());
        let value = b"probe";
        if !self.set(&key, value, Some(Duration::from_secs(60))).await {
            return false;
        }
        let ok = match self.get(&key).await {
            Some(hit) => hit.value.as_ref() == value,
            None => false,
        };
        self.delete(&key).await && ok
    }
}

/// Fast non-cryptographic key hash (FxHash algorithm)
///
/// Keys become filenames and segment tokens; the hash only has to spread
/// well, not resist collisions from an adversary.
#[inline]
pub(crate) fn fx_hash(bytes: &[u8]) -> u64 {
    const SEED: u64 = 0x517cc1b727220a95;
    let mut hash = SEED;
    for &byte in bytes {
        hash = hash.rotate_left(5) ^ (byte as u64);
        hash = hash.wrapping_mul(SEED);
    }
    hash
}

/// Deterministic per-key token for file- and segment-backed tiers
#[inline]
pub(crate) fn key_token(key: &str) -> String {
    format!("{:016x}", fx_hash(key.as_bytes()))
}

/// The closed table of adapters, in fixed priority order
///
/// Dispatch goes through this table, never through tier-name matching at
/// call sites.
pub struct BackendSet {
    backends: Vec<std::sync::Arc<dyn Backend>>,
}

impl BackendSet {
    /// Build from adapters; order does not matter, lookup is by tier
    pub fn new(backends: Vec<std::sync::Arc<dyn Backend>>) -> Self {
        Self { backends }
    }

    /// Adapter for one tier, if it was constructed
    pub fn get(&self, tier: Tier) -> Option<&std::sync::Arc<dyn Backend>> {
        self.backends.iter().find(|b| b.tier() == tier)
    }

    /// Adapters in fixed priority order
    pub fn in_priority_order(&self) -> impl Iterator<Item = &std::sync::Arc<dyn Backend>> {
        Tier::ALL.iter().filter_map(|tier| self.get(*tier))
    }

    /// Tiers that have an adapter
    pub fn tiers(&self) -> Vec<Tier> {
        Tier::ALL
            .iter()
            .copied()
            .filter(|t| self.get(*t).is_some())
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
