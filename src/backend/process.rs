//! Process-local tier backed by a concurrent map
//!
//! Thin pass-through to an in-process store with a configurable key prefix.
//! Expired entries are dropped lazily on read, so the engine's sweep skips
//! this tier.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use super::{Backend, CacheHit};
use crate::config::LocalTierConfig;
use crate::envelope::{epoch_now, expiry_from_ttl};
use crate::tier::Tier;

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

/// Process-local concurrent-map tier
pub struct ProcessBackend {
    store: DashMap<String, StoredEntry>,
    prefix: String,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ProcessBackend {
    /// Create a new process-local backend
    pub fn new(config: LocalTierConfig) -> Self {
        Self {
            store: DashMap::new(),
            prefix: config.key_prefix,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Backend for ProcessBackend {
    fn tier(&self) -> Tier {
        Tier::Process
    }

    async fn get(&self, key: &str) -> Option<CacheHit> {
        let full = self.full_key(key);

        let expired = match self.store.get(&full) {
            Some(entry) if entry.is_expired() => true,
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(CacheHit::with_ttl(
                    entry.value.clone(),
                    entry.remaining_ttl(),
                ));
            }
            None => false,
        };

        if expired {
            self.store.remove(&full);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> bool {
        self.store.insert(
            self.full_key(key),
            StoredEntry {
                expires: expiry_from_ttl(ttl),
                value: Bytes::copy_from_slice(value),
            },
        );
        true
    }

    async fn delete(&self, key: &str) -> bool {
        self.store.remove(&self.full_key(key));
        true
    }

    async fn clear(&self) -> bool {
        self.store.clear();
        true
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> ProcessBackend {
        ProcessBackend::new(LocalTierConfig::default())
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let b = backend();
        assert!(b.set("k", b"value", None).await);

        let hit = b.get("k").await.unwrap();
        assert_eq!(hit.value.as_ref(), b"value");
        assert!(hit.remaining_ttl.is_none());
    }

    #[tokio::test]
    async fn test_miss_and_counters() {
        let b = backend();
        assert!(b.get("absent").await.is_none());
        b.set("k", b"v", None).await;
        b.get("k").await;

        assert_eq!(b.hits(), 1);
        assert_eq!(b.misses(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_miss_and_purged() {
        let b = backend();
        // Force an already-expired entry
        b.store.insert(
            b.full_key("old"),
            StoredEntry {
                expires: 1,
                value: Bytes::from_static(b"stale"),
            },
        );

        assert!(b.get("old").await.is_none());
        assert!(b.is_empty());
    }

    #[tokio::test]
    async fn test_remaining_ttl_reported() {
        let b = backend();
        b.set("k", b"v", Some(Duration::from_secs(120))).await;

        let hit = b.get("k").await.unwrap();
        let remaining = hit.remaining_ttl.unwrap();
        assert!(remaining.as_secs() > 110 && remaining.as_secs() <= 120);
    }

    #[tokio::test]
    async fn test_delete_missing_is_success() {
        let b = backend();
        assert!(b.delete("never-existed").await);
    }

    #[tokio::test]
    async fn test_clear() {
        let b = backend();
        for i in 0..5 {
            b.set(&format!("k{i}"), b"v", None).await;
        }
        assert_eq!(b.len(), 5);
        assert!(b.clear().await);
        assert!(b.is_empty());
    }

    #[tokio::test]
    async fn test_prefix_isolation() {
        let a = ProcessBackend::new(LocalTierConfig {
            key_prefix: "a:".into(),
        });
        a.set("k", b"v", None).await;
        assert!(a.store.contains_key("a:k"));
    }
}
