//! Shared-memory tier
//!
//! One fixed-size segment per key under the shared-memory filesystem
//! (tmpfs, `/dev/shm` by default), addressed by a deterministic token so
//! independent processes resolve the same key to the same segment. The
//! envelope is padded out to the segment size on write; payloads that do
//! not fit are rejected.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::{key_token, Backend, CacheHit};
use crate::envelope::Envelope;
use crate::error::Result;
use crate::tier::Tier;

/// Filename prefix for segments
const SEG_PREFIX: &str = "seg_";

/// Shared-memory segment tier
pub struct ShmBackend {
    dir: PathBuf,
    segment_size: usize,
}

impl ShmBackend {
    /// Create the backend, establishing the segment directory
    ///
    /// Fails when the shared-memory filesystem is not present or not
    /// writable; the engine then marks the tier invalid.
    pub fn new(dir: PathBuf, segment_size: usize) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, segment_size })
    }

    /// Segment size every entry is padded to
    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    fn segment_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{SEG_PREFIX}{}", key_token(key)))
    }

    fn is_segment(path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(SEG_PREFIX))
    }
}

#[async_trait]
impl Backend for ShmBackend {
    fn tier(&self) -> Tier {
        Tier::Shm
    }

    async fn get(&self, key: &str) -> Option<CacheHit> {
        let path = self.segment_for(key);
        let raw = tokio::fs::read(&path).await.ok()?;
        let env = Envelope::decode_binary(&raw)?;

        if env.is_expired() {
            let _ = tokio::fs::remove_file(&path).await;
            return None;
        }
        let remaining = env.remaining_ttl();
        Some(CacheHit::with_ttl(env.into_value(), remaining))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> bool {
        let env = Envelope::new(value.to_vec(), ttl);
        if env.binary_len() > self.segment_size {
            warn!(
                tier = "shm",
                key,
                payload = env.binary_len(),
                segment = self.segment_size,
                "payload exceeds segment size"
            );
            return false;
        }
        let mut buf = env.encode_binary();
        buf.resize(self.segment_size, 0);

        match tokio::fs::write(self.segment_for(key), buf).await {
            Ok(()) => true,
            Err(err) => {
                warn!(tier = "shm", key, %err, "segment write failed");
                false
            }
        }
    }

    async fn delete(&self, key: &str) -> bool {
        match tokio::fs::remove_file(self.segment_for(key)).await {
            Ok(()) => true,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => true,
            Err(err) => {
                warn!(tier = "shm", key, %err, "segment delete failed");
                false
            }
        }
    }

    async fn clear(&self) -> bool {
        let mut ok = true;
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return false;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if Self::is_segment(&path) && tokio::fs::remove_file(&path).await.is_err() {
                ok = false;
            }
        }
        ok
    }

    async fn cleanup_expired(&self) -> usize {
        let mut removed = 0;
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return 0;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !Self::is_segment(&path) {
                continue;
            }
            let Ok(raw) = tokio::fs::read(&path).await else {
                continue;
            };
            let expired = match Envelope::decode_binary(&raw) {
                Some(env) => env.is_expired(),
                // Undecodable segment; reclaim it
                None => true,
            };
            if expired && tokio::fs::remove_file(&path).await.is_ok() {
                removed += 1;
            }
        }
        removed
    }
}

// =============================================================================
// Tests
// =============================================================================
