//! Cache warming
//!
//! Warmers preload entries ahead of traffic. Each one declares whether it
//! applies to the current engine, then loads whatever it owns and reports
//! how many entries it wrote. The manager runs a registry of warmers either
//! sequentially or concurrently and keeps running totals.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::combinators;
use crate::engine::CacheEngine;
use crate::error::Result;

/// One source of preloadable entries
#[async_trait]
pub trait Warmer: Send + Sync {
    /// Stable name, used in reports and logs
    fn name(&self) -> &str;

    /// Whether this warmer has anything to do against this engine
    async fn is_applicable(&self, _engine: &CacheEngine) -> bool {
        true
    }

    /// Load entries, returning how many were written
    async fn warm(&self, engine: &CacheEngine) -> Result<usize>;
}

/// Outcome of one warmer in a run
#[derive(Debug, Clone)]
pub struct WarmerOutcome {
    pub name: String,
    /// Entries written; zero when skipped or failed
    pub warmed: usize,
    /// How long the warmer ran
    pub duration: Duration,
    /// Whether `is_applicable` declined the run
    pub skipped: bool,
    /// Failure diagnostic, if the warmer errored
    pub error: Option<String>,
}

/// Result of one full warming run
#[derive(Debug, Clone)]
pub struct WarmingReport {
    pub outcomes: Vec<WarmerOutcome>,
    /// Entries written in this run
    pub warmed: usize,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

/// Registry and runner for warmers
pub struct WarmingManager {
    engine: Arc<CacheEngine>,
    warmers: RwLock<Vec<Arc<dyn Warmer>>>,
    total_warmed: AtomicU64,
    runs: AtomicU64,
    total_run_micros: AtomicU64,
    last_run: RwLock<Option<DateTime<Utc>>>,
}

impl WarmingManager {
    pub fn new(engine: Arc<CacheEngine>) -> Self {
        Self {
            engine,
            warmers: RwLock::new(Vec::new()),
            total_warmed: AtomicU64::new(0),
            runs: AtomicU64::new(0),
            total_run_micros: AtomicU64::new(0),
            last_run: RwLock::new(None),
        }
    }

    /// Add a warmer to the registry
    pub fn register(&self, warmer: Arc<dyn Warmer>) {
        self.warmers.write().push(warmer);
    }

    /// Registered warmer count
    pub fn len(&self) -> usize {
        self.warmers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.warmers.read().is_empty()
    }

    /// Entries written across every run so far
    pub fn total_warmed(&self) -> u64 {
        self.total_warmed.load(Ordering::Relaxed)
    }

    /// Completed run count
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    /// Mean duration of a full run, across every run so far
    pub fn average_run_duration(&self) -> Option<Duration> {
        let runs = self.runs.load(Ordering::Relaxed);
        if runs == 0 {
            return None;
        }
        let micros = self.total_run_micros.load(Ordering::Relaxed);
        Some(Duration::from_micros(micros / runs))
    }

    /// When the last run started
    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        *self.last_run.read()
    }

    async fn run_one(&self, warmer: Arc<dyn Warmer>) -> WarmerOutcome {
        let name = warmer.name().to_string();
        let started = std::time::Instant::now();
        if !warmer.is_applicable(&self.engine).await {
            return WarmerOutcome {
                name,
                warmed: 0,
                duration: started.elapsed(),
                skipped: true,
                error: None,
            };
        }
        match warmer.warm(&self.engine).await {
            Ok(warmed) => {
                info!(warmer = %name, warmed, "warmer finished");
                WarmerOutcome {
                    name,
                    warmed,
                    duration: started.elapsed(),
                    skipped: false,
                    error: None,
                }
            }
            Err(err) => {
                warn!(warmer = %name, error = %err, "warmer failed");
                WarmerOutcome {
                    name,
                    warmed: 0,
                    duration: started.elapsed(),
                    skipped: false,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    /// Run every registered warmer
    ///
    /// Concurrent runs settle like `all_settled`: one failing warmer never
    /// stops the others, and outcomes keep registration order.
    pub async fn warm_all(&self, concurrent: bool) -> WarmingReport {
        let started_at = Utc::now();
        let started = std::time::Instant::now();
        let warmers: Vec<Arc<dyn Warmer>> = self.warmers.read().clone();

        let outcomes = if concurrent {
            let futures: Vec<_> = warmers
                .into_iter()
                .map(|warmer| async move { Ok::<_, crate::error::Error>(self.run_one(warmer).await) })
                .collect();
            combinators::all_settled(futures)
                .await
                .into_iter()
                .filter_map(|settled| settled.fulfilled())
                .collect()
        } else {
            let mut out = Vec::with_capacity(warmers.len());
            for warmer in warmers {
                out.push(self.run_one(warmer).await);
            }
            out
        };

        let warmed: usize = outcomes.iter().map(|o| o.warmed).sum();
        let duration = started.elapsed();
        self.total_warmed.fetch_add(warmed as u64, Ordering::Relaxed);
        self.runs.fetch_add(1, Ordering::Relaxed);
        self.total_run_micros
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        *self.last_run.write() = Some(started_at);

        WarmingReport {
            outcomes,
            warmed,
            started_at,
            duration,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
