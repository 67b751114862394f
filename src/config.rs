//! Engine and per-tier configuration
//!
//! Everything defaults to something usable; consumers override fields before
//! constructing the engine. Networked tiers that are unreachable simply fail
//! their probe and drop out of the chain.

use std::path::PathBuf;
use std::time::Duration;

use crate::tier::Tier;

/// Default TTL applied when a caller passes no explicit one
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// How long a probe result stays valid before rediscovery
pub const DEFAULT_PROBE_TTL: Duration = Duration::from_secs(300);

/// Filesystem fallback tier configuration
#[derive(Debug, Clone)]
pub struct FileTierConfig {
    /// Preferred base path; tried first during directory bootstrap
    pub base_path: Option<PathBuf>,
    /// Subdirectory name used inside system temp candidates
    pub dir_name: String,
}

impl Default for FileTierConfig {
    fn default() -> Self {
        Self {
            base_path: None,
            dir_name: "stratacache".to_string(),
        }
    }
}

impl FileTierConfig {
    /// Candidate directories in bootstrap order: the configured path first,
    /// then system-temp variants
    pub fn candidates(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        if let Some(path) = &self.base_path {
            out.push(path.clone());
        }
        let tmp = std::env::temp_dir();
        out.push(tmp.join(&self.dir_name));
        out.push(tmp.join(format!("{}-cache", self.dir_name)));
        out.push(PathBuf::from("/var/tmp").join(&self.dir_name));
        out
    }
}

/// Snippet-store tier configuration
#[derive(Debug, Clone, Default)]
pub struct SnippetTierConfig {
    /// Directory for generated units; engine bootstrap fills this in when
    /// unset, as a sibling of the file-tier directory
    pub dir: Option<PathBuf>,
}

/// Shared-memory tier configuration
#[derive(Debug, Clone)]
pub struct ShmTierConfig {
    /// Shared-memory filesystem root
    pub dir: PathBuf,
    /// Fixed segment size per key; payloads that do not fit are rejected
    pub segment_size: usize,
}

impl Default for ShmTierConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/dev/shm/stratacache"),
            segment_size: 64 * 1024,
        }
    }
}

/// Memory-mapped-file tier configuration
#[derive(Debug, Clone)]
pub struct MmapTierConfig {
    /// Directory for mapped files; engine bootstrap fills this in when unset
    pub dir: Option<PathBuf>,
    /// Default file size; files grow beyond it only when the payload needs to
    pub default_file_size: usize,
}

impl Default for MmapTierConfig {
    fn default() -> Self {
        Self {
            dir: None,
            default_file_size: 64 * 1024,
        }
    }
}

/// Process-local tier configuration (shared by both in-process stores)
#[derive(Debug, Clone)]
pub struct LocalTierConfig {
    /// Prefix prepended to every key
    pub key_prefix: String,
}

impl Default for LocalTierConfig {
    fn default() -> Self {
        Self {
            key_prefix: "sc:".to_string(),
        }
    }
}

/// Networked tier configuration (Redis-like and Memcached-like)
#[derive(Debug, Clone)]
pub struct NetTierConfig {
    /// Store host
    pub host: String,
    /// Store port
    pub port: u16,
    /// Optional AUTH password (RESP tier only)
    pub password: Option<String>,
    /// Prefix prepended to every key
    pub key_prefix: String,
    /// Read timeout for one protocol exchange
    pub read_timeout: Duration,
}

impl NetTierConfig {
    fn with_port(port: u16) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port,
            password: None,
            key_prefix: "sc:".to_string(),
            read_timeout: Duration::from_secs(2),
        }
    }

    /// Default Redis-like endpoint
    pub fn redis_default() -> Self {
        Self::with_port(6379)
    }

    /// Default Memcached-like endpoint
    pub fn memcached_default() -> Self {
        Self::with_port(11211)
    }
}

/// Connection pool configuration, per networked backend
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections pre-created at pool initialization
    pub min_connections: usize,
    /// Hard cap on active + idle connections
    pub max_connections: usize,
    /// Idle connections older than this are evicted by `cleanup`
    pub idle_timeout: Duration,
    /// Timeout for one TCP connect attempt
    pub connect_timeout: Duration,
    /// Connect attempts before giving up
    pub connect_attempts: u32,
    /// Fixed delay between connect attempts
    pub retry_delay: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 8,
            idle_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_millis(500),
            connect_attempts: 2,
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Filesystem fallback tier
    pub file: FileTierConfig,
    /// Snippet-store tier
    pub snippet: SnippetTierConfig,
    /// Shared-memory tier
    pub shm: ShmTierConfig,
    /// Memory-mapped tier
    pub mmap: MmapTierConfig,
    /// Process-local concurrent-map tier
    pub process: LocalTierConfig,
    /// Process-local sharded-map tier
    pub sharded: LocalTierConfig,
    /// Redis-like tier
    pub redis: NetTierConfig,
    /// Memcached-like tier
    pub memcached: NetTierConfig,
    /// Pool settings for networked tiers
    pub pool: PoolConfig,
    /// Default TTL when a caller passes none
    pub default_ttl: Duration,
    /// Fallback TTL for promotion copies when the source tier cannot report
    /// a remaining TTL
    pub promotion_ttl: Duration,
    /// How long probe results stay valid
    pub probe_ttl: Duration,
    /// Tiers excluded up front, before probing
    pub disabled_tiers: Vec<Tier>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            file: FileTierConfig::default(),
            snippet: SnippetTierConfig::default(),
            shm: ShmTierConfig::default(),
            mmap: MmapTierConfig::default(),
            process: LocalTierConfig::default(),
            sharded: LocalTierConfig {
                key_prefix: "scs:".to_string(),
            },
            redis: NetTierConfig::redis_default(),
            memcached: NetTierConfig::memcached_default(),
            pool: PoolConfig::default(),
            default_ttl: DEFAULT_TTL,
            promotion_ttl: DEFAULT_TTL,
            probe_ttl: DEFAULT_PROBE_TTL,
            disabled_tiers: Vec::new(),
        }
    }
}

impl CacheConfig {
    /// Configuration with every tier rooted under one directory and the
    /// networked tiers disabled; the shape used throughout the test suite
    pub fn local_only(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            file: FileTierConfig {
                base_path: Some(root.join("file")),
                ..Default::default()
            },
            snippet: SnippetTierConfig {
                dir: Some(root.join("snippet")),
            },
            shm: ShmTierConfig {
                dir: root.join("shm"),
                ..Default::default()
            },
            mmap: MmapTierConfig {
                dir: Some(root.join("mmap")),
                ..Default::default()
            },
            disabled_tiers: vec![Tier::Redis, Tier::Memcached],
            ..Default::default()
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_candidates_order() {
        let config = FileTierConfig {
            base_path: Some(PathBuf::from("/custom/cache")),
            ..Default::default()
        };
        let candidates = config.candidates();
        assert_eq!(candidates[0], PathBuf::from("/custom/cache"));
        assert!(candidates.len() >= 3);
    }

    #[test]
    fn test_file_candidates_without_base_path() {
        let candidates = FileTierConfig::default().candidates();
        assert!(candidates.iter().all(|p| !p.as_os_str().is_empty()));
    }

    #[test]
    fn test_pool_defaults_bounded() {
        let pool = PoolConfig::default();
        assert!(pool.min_connections <= pool.max_connections);
        assert!(pool.connect_attempts >= 1);
    }

    #[test]
    fn test_local_only_disables_networked_tiers() {
        let config = CacheConfig::local_only("/tmp/x");
        assert!(config.disabled_tiers.contains(&Tier::Redis));
        assert!(config.disabled_tiers.contains(&Tier::Memcached));
    }
}
