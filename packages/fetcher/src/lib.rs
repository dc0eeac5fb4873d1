#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Checkpointed, deduplicated batch fetching.
//!
//! [`BatchFetcher::run`] drives one remote call per work item, in batches
//! of [`BatchConfig::batch_size`] issued concurrently, and records every
//! result in a [`ResultLedger`]. After each batch the ledger is saved to a
//! [`LedgerStore`], so an interrupted run loses at most one batch. On the
//! next run, items whose key already appears in the stored ledger are
//! skipped.
//!
//! Per-item failures never escape a batch: they are recorded as
//! [`FetchStatus::Error`](assembly_ledger_models::FetchStatus::Error)
//! outcomes. Only a failure to persist the final ledger is reported to the
//! caller, and even then the ledger is handed back in the error.

pub mod progress;
pub mod sleep;

use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use assembly_ledger::{LedgerError, LedgerStore};
use assembly_ledger_models::{FetchOutcome, LedgerSummary, ResultLedger};
use futures::FutureExt as _;
use serde::Serialize;

use crate::progress::{ProgressCallback, null_progress};
use crate::sleep::{Sleeper, TokioSleeper};

/// Default number of concurrent calls per batch.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default pause between batches.
pub const DEFAULT_INTER_BATCH_DELAY: Duration = Duration::from_secs(2);

/// Default number of outcomes per file for the chunked fallback save.
pub const DEFAULT_FALLBACK_CHUNK_SIZE: usize = 100;

/// Performs the remote call for one work item.
///
/// `Ok(Some(payload))` is recorded as success, `Ok(None)` as no data and
/// `Err(e)` as an error carrying `e.to_string()`. Panics inside the
/// returned future are caught and recorded as errors too.
pub trait FetchOne<T>: Send + Sync {
    /// Failure type reported for a single item.
    type Error: std::fmt::Display + Send;

    /// Fetches the payload for `item`.
    fn fetch_one(
        &self,
        item: &T,
    ) -> impl std::future::Future<Output = Result<Option<serde_json::Value>, Self::Error>> + Send;
}

/// Tuning for a [`BatchFetcher`] run.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Number of items fetched concurrently per batch. Must be at least 1.
    pub batch_size: usize,
    /// Pause between consecutive batches.
    pub inter_batch_delay: Duration,
    /// Treat keys whose latest stored outcome is an error as pending.
    pub retry_errors: bool,
    /// Outcomes per file when the final save falls back to chunked writes.
    pub fallback_chunk_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            inter_batch_delay: DEFAULT_INTER_BATCH_DELAY,
            retry_errors: false,
            fallback_chunk_size: DEFAULT_FALLBACK_CHUNK_SIZE,
        }
    }
}

impl BatchConfig {
    /// Sets the batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the delay between batches.
    #[must_use]
    pub const fn with_inter_batch_delay(mut self, delay: Duration) -> Self {
        self.inter_batch_delay = delay;
        self
    }

    /// Sets whether previously failed keys are fetched again.
    #[must_use]
    pub const fn with_retry_errors(mut self, retry: bool) -> Self {
        self.retry_errors = retry;
        self
    }

    /// Sets the chunk size used by the chunked fallback save.
    #[must_use]
    pub const fn with_fallback_chunk_size(mut self, size: usize) -> Self {
        self.fallback_chunk_size = size;
        self
    }
}

/// What a completed run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// The deduplicated ledger (prior outcomes plus this run's).
    pub ledger: ResultLedger,
    /// Counts derived from `ledger`.
    pub summary: LedgerSummary,
    /// Items that needed a remote call this run.
    pub pending: usize,
    /// Items skipped because their key was already resolved.
    pub skipped: usize,
    /// Batches processed this run.
    pub batches: usize,
    /// Checkpoint saves that succeeded.
    pub checkpoints_saved: usize,
    /// Checkpoint saves that failed (logged and ignored).
    pub checkpoint_failures: usize,
}

/// Errors that abort or fail a run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The configured batch size was zero.
    #[error("Batch size must be at least 1")]
    InvalidBatchSize,

    /// The final ledger could not be written, even after the fallbacks.
    #[error("Failed to persist final ledger to {location}: {source}")]
    FinalPersist {
        /// Where the store was writing.
        location: String,
        /// The error from the primary final save.
        source: LedgerError,
        /// The run's results, still complete in memory.
        report: Box<RunReport>,
    },
}

impl RunError {
    /// Returns the in-memory report carried by a persist failure.
    #[must_use]
    pub fn into_report(self) -> Option<RunReport> {
        match self {
            Self::InvalidBatchSize => None,
            Self::FinalPersist { report, .. } => Some(*report),
        }
    }
}

/// Runs checkpointed batch fetches against a [`LedgerStore`].
pub struct BatchFetcher<S, Z = TokioSleeper> {
    config: BatchConfig,
    store: S,
    sleeper: Z,
    progress: Arc<dyn ProgressCallback>,
}

impl<S: LedgerStore> BatchFetcher<S, TokioSleeper> {
    /// Creates a fetcher that sleeps on the tokio timer between batches.
    #[must_use]
    pub fn new(config: BatchConfig, store: S) -> Self {
        Self {
            config,
            store,
            sleeper: TokioSleeper,
            progress: null_progress(),
        }
    }
}

impl<S: LedgerStore, Z: Sleeper> BatchFetcher<S, Z> {
    /// Replaces the sleeper used between batches.
    #[must_use]
    pub fn with_sleeper<Z2: Sleeper>(self, sleeper: Z2) -> BatchFetcher<S, Z2> {
        BatchFetcher {
            config: self.config,
            store: self.store,
            sleeper,
            progress: self.progress,
        }
    }

    /// Sets the progress callback advanced once per settled item.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// The run configuration.
    #[must_use]
    pub const fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// The backing ledger store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Fetches every item whose key is not yet resolved in the stored
    /// ledger and returns the merged, deduplicated ledger.
    ///
    /// `items` must already be unique by `key_of`; only the output is
    /// deduplicated against history.
    ///
    /// # Errors
    ///
    /// * [`RunError::InvalidBatchSize`] if the batch size is zero.
    /// * [`RunError::FinalPersist`] if the final save and its fallbacks
    ///   fail. The error carries the complete [`RunReport`].
    pub async fn run<T, K, F>(
        &self,
        items: &[T],
        key_of: K,
        fetcher: &F,
    ) -> Result<RunReport, RunError>
    where
        T: Serialize + Sync,
        K: Fn(&T) -> String,
        F: FetchOne<T>,
    {
        let batch_size = self.config.batch_size;
        if batch_size == 0 {
            return Err(RunError::InvalidBatchSize);
        }

        let mut ledger = self.load_existing().await;

        let resolved: BTreeSet<String> = if self.config.retry_errors {
            ledger.resolved_keys()
        } else {
            ledger.keys()
        }
        .into_iter()
        .map(str::to_owned)
        .collect();

        let mut pending: Vec<(&T, String)> = Vec::new();
        let mut skipped = 0;
        for item in items {
            let key = key_of(item);
            if resolved.contains(&key) {
                skipped += 1;
            } else {
                pending.push((item, key));
            }
        }

        log::info!(
            "{} items: {} already resolved, {} need remote calls",
            items.len(),
            skipped,
            pending.len()
        );

        let total_batches = pending.len().div_ceil(batch_size);
        let mut checkpoints_saved = 0;
        let mut checkpoint_failures = 0;

        self.progress.set_total(pending.len() as u64);

        for (i, batch) in pending.chunks(batch_size).enumerate() {
            let batch_number = i + 1;
            log::info!(
                "Processing batch {batch_number}/{total_batches} ({} items)",
                batch.len()
            );
            self.progress
                .set_message(format!("batch {batch_number}/{total_batches}"));

            let outcomes = futures::future::join_all(
                batch
                    .iter()
                    .map(|(item, key)| self.settle(fetcher, *item, key.clone())),
            )
            .await;
            ledger.extend(outcomes);

            let mut summary = ledger.summary();
            summary.batch_completed = Some(batch_number as u64);
            match self.store.save(&ledger, &summary).await {
                Ok(()) => {
                    checkpoints_saved += 1;
                    log::debug!("Checkpoint saved ({} outcomes)", ledger.len());
                }
                Err(e) => {
                    checkpoint_failures += 1;
                    log::warn!(
                        "Failed to save checkpoint after batch {batch_number} to {}: {e}; continuing",
                        self.store.describe()
                    );
                }
            }

            if batch_number < total_batches {
                log::debug!(
                    "Waiting {:?} before next batch...",
                    self.config.inter_batch_delay
                );
                self.sleeper.sleep(self.config.inter_batch_delay).await;
            }
        }

        let removed = ledger.dedup_last_wins();
        if removed > 0 {
            log::warn!("Removed {removed} duplicate outcomes from the ledger");
        }
        let mut summary = ledger.summary();
        summary.duplicates_removed = removed as u64;

        self.progress.finish(format!(
            "{} successful, {} failed, {} no data",
            summary.successful, summary.failed, summary.no_data
        ));

        let report = RunReport {
            ledger,
            summary,
            pending: pending.len(),
            skipped,
            batches: total_batches,
            checkpoints_saved,
            checkpoint_failures,
        };

        if let Err(source) = self.persist_final(&report.ledger, &report.summary).await {
            return Err(RunError::FinalPersist {
                location: self.store.describe(),
                source,
                report: Box::new(report),
            });
        }

        log::info!(
            "Ledger complete: {} total, {} successful, {} failed, {} no data",
            report.summary.total,
            report.summary.successful,
            report.summary.failed,
            report.summary.no_data
        );
        if report.summary.duplicates_removed > 0 {
            log::info!("Duplicates removed: {}", report.summary.duplicates_removed);
        }

        Ok(report)
    }

    /// Loads the stored ledger; absent or unreadable data means a fresh run.
    async fn load_existing(&self) -> ResultLedger {
        match self.store.load().await {
            Ok(Some(ledger)) => {
                log::info!(
                    "Found {} existing outcomes in {}",
                    ledger.len(),
                    self.store.describe()
                );
                ledger
            }
            Ok(None) => {
                log::info!(
                    "No existing ledger at {}, starting fresh",
                    self.store.describe()
                );
                ResultLedger::new()
            }
            Err(e) => {
                log::warn!(
                    "Existing ledger at {} is unreadable ({e}), starting fresh",
                    self.store.describe()
                );
                ResultLedger::new()
            }
        }
    }

    /// Runs one item's fetch and folds every way it can end into an outcome.
    async fn settle<T, F>(&self, fetcher: &F, item: &T, key: String) -> FetchOutcome
    where
        T: Serialize + Sync,
        F: FetchOne<T>,
    {
        let item_json = serde_json::to_value(item).unwrap_or(serde_json::Value::Null);

        let outcome = match AssertUnwindSafe(fetcher.fetch_one(item))
            .catch_unwind()
            .await
        {
            Ok(Ok(Some(payload))) => {
                log::debug!("Success for {key}");
                FetchOutcome::success(key, item_json, payload)
            }
            Ok(Ok(None)) => {
                log::debug!("No data for {key}");
                FetchOutcome::no_data(key, item_json)
            }
            Ok(Err(e)) => {
                log::warn!("Error for {key}: {e}");
                FetchOutcome::error(key, item_json, e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                log::error!("Fetch for {key} panicked: {message}");
                FetchOutcome::error(key, item_json, format!("fetch panicked: {message}"))
            }
        };

        self.progress.inc(1);
        outcome
    }

    /// Final save with fallbacks: chunked files, then summary only.
    ///
    /// Returns the primary save error if it failed, whatever the fallbacks
    /// managed to write.
    async fn persist_final(
        &self,
        ledger: &ResultLedger,
        summary: &LedgerSummary,
    ) -> Result<(), LedgerError> {
        let Err(primary) = self.store.save(ledger, summary).await else {
            log::info!("Results saved to {}", self.store.describe());
            return Ok(());
        };

        log::warn!(
            "Final save to {} failed ({primary}), trying fallback writes",
            self.store.describe()
        );

        match self
            .store
            .save_chunked(ledger, self.config.fallback_chunk_size)
            .await
        {
            Ok(chunks) => log::info!("Fallback: ledger written as {chunks} chunks"),
            Err(e) => log::warn!("Fallback chunked save failed: {e}"),
        }

        match self.store.save_summary(summary).await {
            Ok(()) => log::info!("Fallback: summary written"),
            Err(e) => log::error!("Fallback summary save failed: {e}"),
        }

        Err(primary)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
