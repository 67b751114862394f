//! Engine counters
//!
//! Lock-free per-tier hit/miss/promotion counters plus engine-wide write
//! totals. Snapshots are plain serializable structs.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::tier::Tier;

#[derive(Default)]
struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    promotions: AtomicU64,
}

/// Counters kept by the engine across its lifetime
#[derive(Default)]
pub struct EngineMetrics {
    tiers: [TierCounters; Tier::ALL.len()],
    sets: AtomicU64,
    deletes: AtomicU64,
    clears: AtomicU64,
    sweeps: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn at(&self, tier: Tier) -> &TierCounters {
        &self.tiers[tier.priority()]
    }

    pub fn record_hit(&self, tier: Tier) {
        self.at(tier).hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self, tier: Tier) {
        self.at(tier).misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_promotion(&self, tier: Tier) {
        self.at(tier).promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_clear(&self) {
        self.clears.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sweep(&self, removed: usize) {
        self.sweeps.fetch_add(removed as u64, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        let tiers = Tier::ALL
            .iter()
            .map(|tier| {
                let c = self.at(*tier);
                TierMetrics {
                    tier: tier.name(),
                    hits: c.hits.load(Ordering::Relaxed),
                    misses: c.misses.load(Ordering::Relaxed),
                    promotions: c.promotions.load(Ordering::Relaxed),
                }
            })
            .collect();
        MetricsSnapshot {
            tiers,
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            clears: self.clears.load(Ordering::Relaxed),
            swept_entries: self.sweeps.load(Ordering::Relaxed),
        }
    }
}

/// Read/promotion counters for one tier
#[derive(Debug, Clone, Serialize)]
pub struct TierMetrics {
    pub tier: &'static str,
    pub hits: u64,
    pub misses: u64,
    pub promotions: u64,
}

impl TierMetrics {
    /// Hit ratio in [0, 1]; zero when the tier was never read
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Full engine counter snapshot, tiers in priority order
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub tiers: Vec<TierMetrics>,
    pub sets: u64,
    pub deletes: u64,
    pub clears: u64,
    pub swept_entries: u64,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate_per_tier() {
        let metrics = EngineMetrics::new();
        metrics.record_hit(Tier::Process);
        metrics.record_hit(Tier::Process);
        metrics.record_miss(Tier::Process);
        metrics.record_promotion(Tier::File);
        metrics.record_set();

        let snap = metrics.snapshot();
        let process = snap.tiers.iter().find(|t| t.tier == "process").unwrap();
        assert_eq!(process.hits, 2);
        assert_eq!(process.misses, 1);
        let file = snap.tiers.iter().find(|t| t.tier == "file").unwrap();
        assert_eq!(file.promotions, 1);
        assert_eq!(snap.sets, 1);
    }

    #[test]
    fn test_hit_ratio() {
        let metrics = EngineMetrics::new();
        metrics.record_hit(Tier::Shm);
        metrics.record_hit(Tier::Shm);
        metrics.record_hit(Tier::Shm);
        metrics.record_miss(Tier::Shm);

        let snap = metrics.snapshot();
        let shm = snap.tiers.iter().find(|t| t.tier == "shm").unwrap();
        assert!((shm.hit_ratio() - 0.75).abs() < f64::EPSILON);
        let redis = snap.tiers.iter().find(|t| t.tier == "redis").unwrap();
        assert_eq!(redis.hit_ratio(), 0.0);
    }

    #[test]
    fn test_snapshot_lists_all_tiers_in_priority_order() {
        let snap = EngineMetrics::new().snapshot();
        assert_eq!(snap.tiers.len(), Tier::ALL.len());
        assert_eq!(snap.tiers[0].tier, "snippet");
        assert_eq!(snap.tiers.last().unwrap().tier, "file");
    }
}
