//! Memory-mapped-file tier
//!
//! Same envelope as the shared-memory tier, backed by plain files mapped
//! into the address space. Every read and write is bracketed by an advisory
//! shared/exclusive lock so concurrent processes never observe a torn
//! entry. Files are sized to max(payload, configured default).

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use fs2::FileExt;
use memmap2::{Mmap, MmapMut};
use tracing::warn;

use super::{key_token, Backend, CacheHit};
use crate::envelope::Envelope;
use crate::error::Result;
use crate::tier::Tier;

/// Filename prefix for mapped files
const MAP_PREFIX: &str = "map_";

/// Memory-mapped-file tier
pub struct MmapBackend {
    dir: PathBuf,
    default_file_size: usize,
}

impl MmapBackend {
    /// Create the backend, establishing the map directory
    pub fn new(dir: PathBuf, default_file_size: usize) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            default_file_size,
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{MAP_PREFIX}{}", key_token(key)))
    }

    fn is_map(path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(MAP_PREFIX))
    }

    /// Read one mapped file under a shared lock
    fn read_locked(path: &Path) -> std::io::Result<Option<Envelope>> {
        let file = OpenOptions::new().read(true).open(path)?;
        file.lock_shared()?;
        // SAFETY: the shared advisory lock keeps writers (which take the
        // exclusive lock) out for the lifetime of this mapping.
        let mapped = unsafe { Mmap::map(&file) };
        let env = mapped.ok().and_then(|m| Envelope::decode_binary(&m));
        let _ = file.unlock();
        Ok(env)
    }

    /// Write one mapped file under an exclusive lock
    fn write_locked(path: &Path, buf: &[u8], file_size: usize) -> std::io::Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.lock_exclusive()?;
        let result = (|| {
            file.set_len(file_size as u64)?;
            // SAFETY: exclusive advisory lock held; no concurrent mapping of
            // this file through this subsystem.
            let mut mapped = unsafe { MmapMut::map_mut(&file)? };
            mapped[..buf.len()].copy_from_slice(buf);
            mapped[buf.len()..].fill(0);
            mapped.flush()
        })();
        let _ = file.unlock();
        result
    }
}

#[async_trait]
impl Backend for MmapBackend {
    fn tier(&self) -> Tier {
        Tier::Mmap
    }

    async fn get(&self, key: &str) -> Option<CacheHit> {
        let path = self.path_for(key);
        let env = tokio::task::spawn_blocking(move || Self::read_locked(&path))
            .await
            .ok()?
            .ok()??;

        if env.is_expired() {
            let _ = tokio::fs::remove_file(self.path_for(key)).await;
            return None;
        }
        let remaining = env.remaining_ttl();
        Some(CacheHit::with_ttl(env.into_value(), remaining))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> bool {
        let env = Envelope::new(value.to_vec(), ttl);
        let file_size = env.binary_len().max(self.default_file_size);
        let buf = env.encode_binary();
        let path = self.path_for(key);

        let written =
            tokio::task::spawn_blocking(move || Self::write_locked(&path, &buf, file_size)).await;
        match written {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                warn!(tier = "mmap", key, %err, "mapped write failed");
                false
            }
            Err(err) => {
                warn!(tier = "mmap", key, %err, "write task failed");
                false
            }
        }
    }

    async fn delete(&self, key: &str) -> bool {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => true,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => true,
            Err(err) => {
                warn!(tier = "mmap", key, %err, "delete failed");
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
            if Self::is_map(&path) && tokio::fs::remove_file(&path).await.is_err() {
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
            if !Self::is_map(&path) {
                continue;
            }
            let read_path = path.clone();
            let env = tokio::task::spawn_blocking(move || Self::read_locked(&read_path)).await;
            let expired = match env {
                Ok(Ok(Some(env))) => env.is_expired(),
                // Unreadable or undecodable map file; reclaim it
                _ => true,
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
