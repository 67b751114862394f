//! Generated-snippet tier
//!
//! Highest-priority tier: persists one tiny generated source unit per key,
//! a self-describing JSON document carrying `{expires, value}` under a
//! hashed filename. Read-time expiry deletes the unit outright so nothing
//! stale survives a restart.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{key_token, Backend, CacheHit};
use crate::envelope::Envelope;
use crate::tier::Tier;

/// Filename prefix for generated units
const UNIT_PREFIX: &str = "unit_";

/// Generated-snippet tier
pub struct SnippetBackend {
    dir: PathBuf,
}

impl SnippetBackend {
    /// Create over an existing directory
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// The directory generated units live in
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{UNIT_PREFIX}{}.json", key_token(key)))
    }

    fn is_unit(path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(UNIT_PREFIX) && n.ends_with(".json"))
    }

    async fn read_unit(path: &Path) -> Option<Envelope> {
        let raw = tokio::fs::read(path).await.ok()?;
        serde_json::from_slice(&raw).ok()
    }
}

#[async_trait]
impl Backend for SnippetBackend {
    fn tier(&self) -> Tier {
        Tier::Snippet
    }

    async fn get(&self, key: &str) -> Option<CacheHit> {
        let path = self.path_for(key);
        let env = Self::read_unit(&path).await?;

        if env.is_expired() {
            let _ = tokio::fs::remove_file(&path).await;
            return None;
        }
        let remaining = env.remaining_ttl();
        Some(CacheHit::with_ttl(env.into_value(), remaining))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> bool {
        let env = Envelope::new(value.to_vec(), ttl);
        let doc = match serde_json::to_vec(&env) {
            Ok(doc) => doc,
            Err(err) => {
                warn!(tier = "snippet", key, %err, "encode failed");
                return false;
            }
        };
        match tokio::fs::write(self.path_for(key), doc).await {
            Ok(()) => true,
            Err(err) => {
                warn!(tier = "snippet", key, %err, "write failed");
                false
            }
        }
    }

    async fn delete(&self, key: &str) -> bool {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => true,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => true,
            Err(err) => {
                warn!(tier = "snippet", key, %err, "delete failed");
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
            if Self::is_unit(&path) && tokio::fs::remove_file(&path).await.is_err() {
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
            if !Self::is_unit(&path) {
                continue;
            }
            match Self::read_unit(&path).await {
                Some(env) if env.is_expired() => {
                    if tokio::fs::remove_file(&path).await.is_ok() {
                        removed += 1;
                    }
                }
                Some(_) => {}
                None => {
                    debug!(tier = "snippet", path = %path.display(), "removing corrupt unit");
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::epoch_now;
    use tempfile::TempDir;

    fn backend() -> (TempDir, SnippetBackend) {
        let dir = TempDir::new().unwrap();
        let b = SnippetBackend::new(dir.path().to_path_buf());
        (dir, b)
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let (_dir, b) = backend();
        assert!(b.set("k", b"snippet value", Some(Duration::from_secs(60))).await);

        let hit = b.get("k").await.unwrap();
        assert_eq!(hit.value.as_ref(), b"snippet value");
    }

    #[tokio::test]
    async fn test_unit_is_valid_json() {
        let (_dir, b) = backend();
        b.set("k", b"v", None).await;

        let raw = std::fs::read(b.path_for("k")).unwrap();
        let env: Envelope = serde_json::from_slice(&raw).unwrap();
        assert_eq!(env.value, b"v");
        assert_eq!(env.expires, 0);
    }

    #[tokio::test]
    async fn test_read_time_expiry_deletes_unit() {
        let (_dir, b) = backend();
        let env = Envelope {
            expires: epoch_now() - 10,
            value: b"stale".to_vec(),
        };
        std::fs::write(b.path_for("old"), serde_json::to_vec(&env).unwrap()).unwrap();

        assert!(b.get("old").await.is_none());
        assert!(!b.path_for("old").exists());
    }

    #[tokio::test]
    async fn test_corrupt_unit_is_miss() {
        let (_dir, b) = backend();
        std::fs::write(b.path_for("bad"), b"{truncated").unwrap();
        assert!(b.get("bad").await.is_none());
    }

    #[tokio::test]
    async fn test_clear_and_cleanup() {
        let (_dir, b) = backend();
        b.set("live", b"v", Some(Duration::from_secs(600))).await;
        let env = Envelope {
            expires: epoch_now() - 1,
            value: b"stale".to_vec(),
        };
        std::fs::write(b.path_for("dead"), serde_json::to_vec(&env).unwrap()).unwrap();

        assert_eq!(b.cleanup_expired().await, 1);
        assert!(b.get("live").await.is_some());

        assert!(b.clear().await);
        assert!(b.get("live").await.is_none());
    }

    #[tokio::test]
    async fn test_functional_probe() {
        let (_dir, b) = backend();
        assert!(b.test().await);
    }
}
