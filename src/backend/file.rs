//! Filesystem fallback tier
//!
//! The tier of last resort: once its directory bootstraps, it is always
//! available. Keys hash to filenames inside the bootstrap-resolved
//! directory. The payload leads with a fixed-width expiry timestamp so an
//! expiry check never deserializes the body.
//!
//! Layout: `<20 ASCII digits epoch-seconds><raw value bytes>`; all zeros
//! means no expiry.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use super::{key_token, Backend, CacheHit};
use crate::envelope::{epoch_now, expiry_from_ttl};
use crate::tier::Tier;

/// Width of the leading expiry field
const EXPIRY_WIDTH: usize = 20;

/// Extension for entry files; the sweep and `clear` only touch these
const ENTRY_EXT: &str = "cache";

/// Filesystem fallback tier
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Create over an already-bootstrapped directory
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// The directory entries live in
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{ENTRY_EXT}", key_token(key)))
    }

    fn parse_expiry(raw: &[u8]) -> Option<u64> {
        if raw.len() < EXPIRY_WIDTH {
            return None;
        }
        std::str::from_utf8(&raw[..EXPIRY_WIDTH])
            .ok()?
            .parse::<u64>()
            .ok()
    }

    fn encode(value: &[u8], expires: u64) -> Vec<u8> {
        let mut buf = Vec::with_capacity(EXPIRY_WIDTH + value.len());
        buf.extend_from_slice(format!("{expires:020}").as_bytes());
        buf.extend_from_slice(value);
        buf
    }

    async fn read_entry(&self, path: &Path) -> Option<(u64, Bytes)> {
        let raw = tokio::fs::read(path).await.ok()?;
        let expires = Self::parse_expiry(&raw)?;
        Some((expires, Bytes::copy_from_slice(&raw[EXPIRY_WIDTH..])))
    }
}

#[async_trait]
impl Backend for FileBackend {
    fn tier(&self) -> Tier {
        Tier::File
    }

    async fn get(&self, key: &str) -> Option<CacheHit> {
        let path = self.path_for(key);
        let (expires, value) = self.read_entry(&path).await?;

        if expires != 0 && epoch_now() > expires {
            let _ = tokio::fs::remove_file(&path).await;
            return None;
        }
        let remaining = (expires != 0)
            .then(|| Duration::from_secs(expires.saturating_sub(epoch_now())));
        Some(CacheHit::with_ttl(value, remaining))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> bool {
        let buf = Self::encode(value, expiry_from_ttl(ttl));
        match tokio::fs::write(self.path_for(key), buf).await {
            Ok(()) => true,
            Err(err) => {
                warn!(tier = "file", key, %err, "write failed");
                false
            }
        }
    }

    async fn delete(&self, key: &str) -> bool {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => true,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => true,
            Err(err) => {
                warn!(tier = "file", key, %err, "delete failed");
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
            if path.extension().is_some_and(|e| e == ENTRY_EXT)
                && tokio::fs::remove_file(&path).await.is_err()
            {
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
        let now = epoch_now();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !path.extension().is_some_and(|e| e == ENTRY_EXT) {
                continue;
            }
            // The fixed-width prefix is all the sweep needs to read
            let Ok(raw) = tokio::fs::read(&path).await else {
                continue;
            };
            match Self::parse_expiry(&raw) {
                Some(expires) if expires != 0 && now > expires => {
                    if tokio::fs::remove_file(&path).await.is_ok() {
                        removed += 1;
                    }
                }
                Some(_) => {}
                None => {
                    // Corrupt entry; drop it rather than hold it forever
                    debug!(tier = "file", path = %path.display(), "removing corrupt entry");
                    let _ = tokio::fs::remove_file(&path).await;
                }
            }
        }
        removed
    }
}

// =============================================================================
// Tests
// =============================================================================
