//! Task-based facade over the engine
//!
//! Wraps every engine operation in a future with an explicit execution
//! policy: `Inline` awaits on the caller's task, `Deferred` moves the work
//! onto a spawned task. Batches run through the combinators, so a pipeline
//! settles like `all` does.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::combinators;
use crate::engine::CacheEngine;
use crate::error::{Error, Result};

/// Where facade operations execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionPolicy {
    /// Await the operation on the calling task
    #[default]
    Inline,
    /// Spawn the operation onto the runtime and await its handle
    Deferred,
}

/// One operation in a [`AsyncCache::pipeline`] batch
#[derive(Debug, Clone)]
pub enum CacheOp {
    Get { key: String },
    Set { key: String, value: Vec<u8>, ttl: Option<Duration> },
    Delete { key: String },
    Clear,
}

/// The settled output of one pipeline operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpOutput {
    /// Output of a `Get`
    Value(Option<Bytes>),
    /// Output of a `Set`, `Delete`, or `Clear`
    Done(bool),
}

/// Asynchronous cache surface
///
/// Cheap to clone; clones share the engine and keep their own policy.
#[derive(Clone)]
pub struct AsyncCache {
    engine: Arc<CacheEngine>,
    policy: ExecutionPolicy,
}

impl AsyncCache {
    pub fn new(engine: Arc<CacheEngine>, policy: ExecutionPolicy) -> Self {
        Self { engine, policy }
    }

    /// The shared engine
    pub fn engine(&self) -> &Arc<CacheEngine> {
        &self.engine
    }

    /// This facade's execution policy
    pub fn policy(&self) -> ExecutionPolicy {
        self.policy
    }

    /// Same engine, different policy
    pub fn with_policy(&self, policy: ExecutionPolicy) -> Self {
        Self {
            engine: self.engine.clone(),
            policy,
        }
    }

    async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        match self.policy {
            ExecutionPolicy::Inline => Ok(fut.await),
            ExecutionPolicy::Deferred => tokio::spawn(fut)
                .await
                .map_err(|err| Error::Task(err.to_string())),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let engine = self.engine.clone();
        let key = key.to_string();
        self.run(async move { engine.get(&key).await }).await
    }

    pub async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<bool> {
        let engine = self.engine.clone();
        let key = key.to_string();
        let value = value.to_vec();
        self.run(async move { engine.set(&key, &value, ttl).await })
            .await
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        let engine = self.engine.clone();
        let key = key.to_string();
        self.run(async move { engine.delete(&key).await }).await
    }

    pub async fn clear(&self) -> Result<bool> {
        let engine = self.engine.clone();
        self.run(async move { engine.clear().await }).await
    }

    pub async fn cleanup_expired(&self) -> Result<usize> {
        let engine = self.engine.clone();
        self.run(async move { engine.cleanup_expired().await })
            .await
    }

    /// Run a batch of operations concurrently
    ///
    /// Settles like [`combinators::all`]: outputs come back in input order,
    /// and the batch fails fast if any deferred task fails.
    pub async fn pipeline(&self, ops: Vec<CacheOp>) -> Result<Vec<OpOutput>> {
        let futures: Vec<_> = ops
            .into_iter()
            .map(|op| {
                let facade = self.clone();
                async move {
                    match op {
                        CacheOp::Get { key } => facade.get(&key).await.map(OpOutput::Value),
                        CacheOp::Set { key, value, ttl } => {
                            facade.set(&key, &value, ttl).await.map(OpOutput::Done)
                        }
                        CacheOp::Delete { key } => facade.delete(&key).await.map(OpOutput::Done),
                        CacheOp::Clear => facade.clear().await.map(OpOutput::Done),
                    }
                }
            })
            .collect();
        combinators::all(futures).await
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use tempfile::tempdir;

    async fn facade(dir: &std::path::Path, policy: ExecutionPolicy) -> AsyncCache {
        let engine = Arc::new(CacheEngine::new(CacheConfig::local_only(dir)).await);
        AsyncCache::new(engine, policy)
    }

    #[tokio::test]
    async fn test_inline_roundtrip() {
        let dir = tempdir().unwrap();
        let cache = facade(dir.path(), ExecutionPolicy::Inline).await;

        assert!(cache.set("k", b"v", None).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some(&b"v"[..]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_deferred_roundtrip() {
        let dir = tempdir().unwrap();
        let cache = facade(dir.path(), ExecutionPolicy::Deferred).await;

        assert!(cache.set("k", b"v", None).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some(&b"v"[..]));
        assert!(cache.delete("k").await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_with_policy_shares_engine() {
        let dir = tempdir().unwrap();
        let inline = facade(dir.path(), ExecutionPolicy::Inline).await;
        let deferred = inline.with_policy(ExecutionPolicy::Deferred);

        assert!(inline.set("shared", b"v", None).await.unwrap());
        assert!(deferred.get("shared").await.unwrap().is_some());
        assert_eq!(deferred.policy(), ExecutionPolicy::Deferred);
    }

    #[tokio::test]
    async fn test_pipeline_outputs_in_input_order() {
        let dir = tempdir().unwrap();
        let cache = facade(dir.path(), ExecutionPolicy::Inline).await;

        assert!(cache.set("a", b"1", None).await.unwrap());

        let outputs = cache
            .pipeline(vec![
                CacheOp::Get { key: "a".into() },
                CacheOp::Set {
                    key: "b".into(),
                    value: b"2".to_vec(),
                    ttl: None,
                },
                CacheOp::Delete { key: "missing".into() },
            ])
            .await
            .unwrap();

        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs[0], OpOutput::Value(Some(Bytes::from_static(b"1"))));
        assert_eq!(outputs[1], OpOutput::Done(true));
        assert_eq!(outputs[2], OpOutput::Done(true));
    }

    #[tokio::test]
    async fn test_pipeline_clear() {
        let dir = tempdir().unwrap();
        let cache = facade(dir.path(), ExecutionPolicy::Inline).await;

        cache.set("x", b"1", None).await.unwrap();
        let outputs = cache.pipeline(vec![CacheOp::Clear]).await.unwrap();
        assert_eq!(outputs, vec![OpOutput::Done(true)]);
        assert_eq!(cache.get("x").await.unwrap(), None);
    }
}
