//! Cache tier identifiers
//!
//! The engine walks a fixed, totally ordered set of tiers. Lower priority
//! number = tried first on reads, receives promotion copies.

use serde::Serialize;

/// One caching backend participating in the priority-ordered fallback chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Tier {
    /// Generated-source snippet store (one tiny unit per key)
    Snippet,
    /// Shared-memory segments (one fixed-size segment per key)
    Shm,
    /// Process-local concurrent map
    Process,
    /// Process-local sharded map
    Sharded,
    /// Memory-mapped files with advisory locking
    Mmap,
    /// Networked RESP (Redis-like) store
    Redis,
    /// Networked ASCII-protocol (Memcached-like) store
    Memcached,
    /// Filesystem fallback (always available once bootstrapped)
    File,
}

impl Tier {
    /// All tiers in fixed priority order (highest priority first)
    pub const ALL: [Tier; 8] = [
        Tier::Snippet,
        Tier::Shm,
        Tier::Process,
        Tier::Sharded,
        Tier::Mmap,
        Tier::Redis,
        Tier::Memcached,
        Tier::File,
    ];

    /// Priority rank; 0 is the highest-priority tier
    #[inline]
    pub fn priority(&self) -> usize {
        Self::ALL.iter().position(|t| t == self).unwrap_or(usize::MAX)
    }

    /// Tiers of strictly higher priority than `self`, highest first
    pub fn higher_priority(&self) -> &'static [Tier] {
        &Self::ALL[..self.priority()]
    }

    /// Whether entries in this tier expire on their own, without the
    /// engine's expiry sweep
    #[inline]
    pub fn has_native_ttl(&self) -> bool {
        matches!(
            self,
            Tier::Process | Tier::Sharded | Tier::Redis | Tier::Memcached
        )
    }

    /// Short stable name used in logs and stats
    pub fn name(&self) -> &'static str {
        match self {
            Tier::Snippet => "snippet",
            Tier::Shm => "shm",
            Tier::Process => "process",
            Tier::Sharded => "sharded",
            Tier::Mmap => "mmap",
            Tier::Redis => "redis",
            Tier::Memcached => "memcached",
            Tier::File => "file",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Tests
// =============================================================================
