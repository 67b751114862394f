//! Tier discovery and health
//!
//! Walks the fixed priority list and runs, per tier, a functional probe —
//! an actual write/read/verify/delete against the adapter, not a presence
//! check. Results are cached for a fixed duration and force-refreshable.
//! A failing probe marks the tier unavailable and records a diagnostic; it
//! never propagates.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::backend::BackendSet;
use crate::tier::Tier;

#[derive(Clone)]
struct TierState {
    valid: bool,
    available: bool,
    probed_at: Option<Instant>,
    probed_at_utc: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl TierState {
    fn invalid(reason: String) -> Self {
        Self {
            valid: false,
            available: false,
            probed_at: None,
            probed_at_utc: None,
            last_error: Some(reason),
        }
    }

    fn untested() -> Self {
        Self {
            valid: true,
            available: false,
            probed_at: None,
            probed_at_utc: None,
            last_error: None,
        }
    }
}

/// Point-in-time health of one tier
#[derive(Debug, Clone)]
pub struct TierStatus {
    /// Which tier
    pub tier: Tier,
    /// Whether the adapter could be constructed at all
    pub valid: bool,
    /// Whether the last probe passed
    pub available: bool,
    /// Priority rank (0 = tried first)
    pub priority: usize,
    /// When the tier was last probed
    pub last_probe: Option<DateTime<Utc>>,
    /// Diagnostic from the last failure, if any
    pub last_error: Option<String>,
}

/// Discovers and tracks which tiers are functional on this host
pub struct TierManager {
    backends: Arc<BackendSet>,
    states: RwLock<HashMap<Tier, TierState>>,
    probe_ttl: Duration,
}

impl TierManager {
    /// Create over the adapter table
    ///
    /// `invalid` lists tiers whose adapters failed to construct, with the
    /// reason; they are excluded permanently.
    pub fn new(
        backends: Arc<BackendSet>,
        probe_ttl: Duration,
        invalid: Vec<(Tier, String)>,
    ) -> Self {
        let mut states = HashMap::new();
        for tier in backends.tiers() {
            states.insert(tier, TierState::untested());
        }
        for (tier, reason) in invalid {
            states.insert(tier, TierState::invalid(reason));
        }
        Self {
            backends,
            states: RwLock::new(states),
            probe_ttl,
        }
    }

    fn state_of(&self, tier: Tier) -> Option<TierState> {
        self.states.read().get(&tier).cloned()
    }

    fn probe_is_fresh(&self, state: &TierState) -> bool {
        state
            .probed_at
            .is_some_and(|at| at.elapsed() < self.probe_ttl)
    }

    /// Run the functional probe for one tier, updating the cached state
    pub async fn probe(&self, tier: Tier) -> bool {
        let Some(state) = self.state_of(tier) else {
            return false;
        };
        if !state.valid {
            return false;
        }
        let Some(backend) = self.backends.get(tier) else {
            return false;
        };

        let available = backend.test().await;
        debug!(tier = %tier, available, "probe finished");

        let mut states = self.states.write();
        if let Some(entry) = states.get_mut(&tier) {
            entry.available = available;
            entry.probed_at = Some(Instant::now());
            entry.probed_at_utc = Some(Utc::now());
            if !available {
                entry.last_error = Some(format!("functional probe failed for tier '{tier}'"));
            }
        }
        available
    }

    /// Ordered list of available tiers; probes only where the cached result
    /// has gone stale, unless `force` rediscovers everything
    pub async fn discover(&self, force: bool) -> Vec<Tier> {
        let mut available = Vec::new();
        for tier in Tier::ALL {
            let Some(state) = self.state_of(tier) else {
                continue;
            };
            if !state.valid {
                continue;
            }
            let is_available = if !force && self.probe_is_fresh(&state) {
                state.available
            } else {
                self.probe(tier).await
            };
            if is_available {
                available.push(tier);
            }
        }
        info!(tiers = ?available, "tier discovery complete");
        available
    }

    /// Cached availability; probes when the cache is stale
    pub async fn is_available(&self, tier: Tier) -> bool {
        match self.state_of(tier) {
            Some(state) if !state.valid => false,
            Some(state) if self.probe_is_fresh(&state) => state.available,
            Some(_) => self.probe(tier).await,
            None => false,
        }
    }

    /// Whether the adapter exists at all (independent of probing)
    pub fn is_valid(&self, tier: Tier) -> bool {
        self.state_of(tier).is_some_and(|s| s.valid)
    }

    /// Highest-priority currently-available tier
    pub async fn highest_priority(&self) -> Option<Tier> {
        self.discover(false).await.first().copied()
    }

    /// Lowest-priority currently-available tier
    pub async fn lowest_priority(&self) -> Option<Tier> {
        self.discover(false).await.last().copied()
    }

    /// Force every cached probe result stale
    pub fn invalidate(&self) {
        let mut states = self.states.write();
        for state in states.values_mut() {
            state.probed_at = None;
        }
    }

    /// Record a diagnostic against one tier
    pub fn record_error(&self, tier: Tier, message: impl Into<String>) {
        if let Some(state) = self.states.write().get_mut(&tier) {
            state.last_error = Some(message.into());
        }
    }

    /// Per-tier status snapshot, in priority order
    pub fn status(&self) -> Vec<TierStatus> {
        let states = self.states.read();
        Tier::ALL
            .iter()
            .filter_map(|tier| {
                states.get(tier).map(|state| TierStatus {
                    tier: *tier,
                    valid: state.valid,
                    available: state.available,
                    priority: tier.priority(),
                    last_probe: state.probed_at_utc,
                    last_error: state.last_error.clone(),
                })
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
    use crate::backend::{Backend, ProcessBackend, ShardedBackend};
    use crate::config::LocalTierConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Backend whose probe always fails, counting invocations
    struct FailingBackend {
        probes: AtomicU32,
    }

    #[async_trait]
    impl Backend for FailingBackend {
        fn tier(&self) -> Tier {
            Tier::Mmap
        }
        async fn get(&self, _key: &str) -> Option<crate::backend::CacheHit> {
            None
        }
        async fn set(&self, _key: &str, _value: &[u8], _ttl: Option<Duration>) -> bool {
            self.probes.fetch_add(1, Ordering::Relaxed);
            false
        }
        async fn delete(&self, _key: &str) -> bool {
            false
        }
        async fn clear(&self) -> bool {
            false
        }
    }

    fn local_set() -> Arc<BackendSet> {
        Arc::new(BackendSet::new(vec![
            Arc::new(ProcessBackend::new(LocalTierConfig::default())),
            Arc::new(ShardedBackend::new(LocalTierConfig::default())),
        ]))
    }

    #[tokio::test]
    async fn test_discover_orders_by_priority() {
        let manager = TierManager::new(local_set(), Duration::from_secs(300), vec![]);
        let tiers = manager.discover(false).await;
        assert_eq!(tiers, vec![Tier::Process, Tier::Sharded]);
    }

    #[tokio::test]
    async fn test_discover_is_idempotent_while_fresh() {
        let manager = TierManager::new(local_set(), Duration::from_secs(300), vec![]);
        let first = manager.discover(false).await;
        let second = manager.discover(false).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_cached_probe_not_rerun_until_forced() {
        let failing = Arc::new(FailingBackend {
            probes: AtomicU32::new(0),
        });
        let set = Arc::new(BackendSet::new(vec![failing.clone() as Arc<dyn Backend>]));
        let manager = TierManager::new(set, Duration::from_secs(300), vec![]);

        manager.discover(false).await;
        manager.discover(false).await;
        assert_eq!(failing.probes.load(Ordering::Relaxed), 1);

        manager.discover(true).await;
        assert_eq!(failing.probes.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_failed_probe_marks_unavailable_with_diagnostic() {
        let failing = Arc::new(FailingBackend {
            probes: AtomicU32::new(0),
        });
        let set = Arc::new(BackendSet::new(vec![failing as Arc<dyn Backend>]));
        let manager = TierManager::new(set, Duration::from_secs(300), vec![]);

        assert!(manager.discover(false).await.is_empty());
        assert!(!manager.is_available(Tier::Mmap).await);
        assert!(manager.is_valid(Tier::Mmap));

        let status = manager.status();
        let mmap = status.iter().find(|s| s.tier == Tier::Mmap).unwrap();
        assert!(!mmap.available);
        assert!(mmap.last_error.as_deref().unwrap().contains("probe failed"));
        assert!(mmap.last_probe.is_some());
    }

    #[tokio::test]
    async fn test_invalid_tier_is_never_probed() {
        let manager = TierManager::new(
            local_set(),
            Duration::from_secs(300),
            vec![(Tier::File, "no writable directory".into())],
        );

        assert!(!manager.is_valid(Tier::File));
        assert!(!manager.is_available(Tier::File).await);

        let status = manager.status();
        let file = status.iter().find(|s| s.tier == Tier::File).unwrap();
        assert_eq!(file.last_error.as_deref(), Some("no writable directory"));
    }

    #[tokio::test]
    async fn test_highest_and_lowest_priority() {
        let manager = TierManager::new(local_set(), Duration::from_secs(300), vec![]);
        assert_eq!(manager.highest_priority().await, Some(Tier::Process));
        assert_eq!(manager.lowest_priority().await, Some(Tier::Sharded));
    }

    #[tokio::test]
    async fn test_invalidate_forces_reprobe() {
        let failing = Arc::new(FailingBackend {
            probes: AtomicU32::new(0),
        });
        let set = Arc::new(BackendSet::new(vec![failing.clone() as Arc<dyn Backend>]));
        let manager = TierManager::new(set, Duration::from_secs(300), vec![]);

        manager.discover(false).await;
        manager.invalidate();
        manager.discover(false).await;
        assert_eq!(failing.probes.load(Ordering::Relaxed), 2);
    }
}
