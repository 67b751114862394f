//! StrataCache - Multi-Tier Caching Engine
//!
//! A tiered cache that discovers which storage tiers actually work on the
//! current host, reads through them fastest-first, and promotes hits toward
//! the fast end. Tiers range from in-process maps through shared-memory and
//! memory-mapped files to networked stores, with a plain-file fallback that
//! works everywhere.
//!
//! # Architecture
//!
//! ```text
//! AsyncCache (facade) → CacheEngine → TierManager → Backend adapters
//!                            │                          ├ snippet / shm / mmap / file
//!                            │                          ├ process / sharded
//!                            └ EngineMetrics            └ redis / memcached ← ConnectionPool
//! ```
//!
//! Reads walk the available tiers in a fixed priority order and copy a hit
//! into every faster tier. Writes fan out to all available tiers. A tier
//! that fails its functional probe simply drops out of the chain until the
//! next discovery.
//!
//! # Modules
//!
//! - [`backend`] - One adapter per storage tier
//! - [`combinators`] - Settlement combinators for batched work
//! - [`config`] - Engine and per-tier configuration
//! - [`engine`] - The tiered engine itself
//! - [`envelope`] - TTL envelope for tiers without native expiry
//! - [`error`] - Error types
//! - [`facade`] - Task-based async surface
//! - [`manager`] - Tier discovery and health
//! - [`metrics`] - Hit/miss/promotion counters
//! - [`pool`] - Bounded connection pool for the networked tiers
//! - [`warming`] - Cache warmer registry

pub mod backend;
pub mod combinators;
pub mod config;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod facade;
pub mod manager;
pub mod metrics;
pub mod pool;
pub mod tier;
pub mod warming;

// Re-export commonly used types
pub use backend::{Backend, CacheHit};
pub use combinators::Settled;
pub use config::CacheConfig;
pub use engine::{CacheEngine, EngineStatus};
pub use error::{Error, Result};
pub use facade::{AsyncCache, CacheOp, ExecutionPolicy, OpOutput};
pub use manager::{TierManager, TierStatus};
pub use metrics::MetricsSnapshot;
pub use pool::{ConnectionPool, PoolStats};
pub use tier::Tier;
pub use warming::{Warmer, WarmingManager, WarmingReport};
