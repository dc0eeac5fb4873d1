//! In-memory ledger store.
//!
//! Keeps the last saved ledger and counts calls, and can be told to fail
//! writes. Used by tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use assembly_ledger_models::{LedgerSummary, ResultLedger};

use crate::{LedgerError, LedgerStore};

/// A [`LedgerStore`] that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    ledger: Mutex<Option<ResultLedger>>,
    summary: Mutex<Option<LedgerSummary>>,
    saves: AtomicUsize,
    chunked_saves: AtomicUsize,
    summary_saves: AtomicUsize,
    fail_saves: AtomicBool,
    fail_fallbacks: AtomicBool,
    unreadable: AtomicBool,
}

impl MemoryLedgerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `ledger`.
    #[must_use]
    pub fn with_ledger(ledger: ResultLedger) -> Self {
        let store = Self::default();
        *store.ledger.lock().unwrap_or_else(PoisonError::into_inner) = Some(ledger);
        store
    }

    /// Makes every subsequent `save` fail (or succeed again).
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Makes the chunked and summary-only fallbacks fail as well.
    pub fn set_fail_fallbacks(&self, fail: bool) {
        self.fail_fallbacks.store(fail, Ordering::SeqCst);
    }

    /// Makes `load` report unreadable data.
    pub fn set_unreadable(&self, unreadable: bool) {
        self.unreadable.store(unreadable, Ordering::SeqCst);
    }

    /// Number of `save` calls made so far, including failed ones.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Number of chunked fallback attempts, including failed ones.
    #[must_use]
    pub fn chunked_save_count(&self) -> usize {
        self.chunked_saves.load(Ordering::SeqCst)
    }

    /// Number of summary-only fallback attempts, including failed ones.
    #[must_use]
    pub fn summary_save_count(&self) -> usize {
        self.summary_saves.load(Ordering::SeqCst)
    }

    /// A copy of the last successfully saved ledger.
    #[must_use]
    pub fn snapshot(&self) -> Option<ResultLedger> {
        self.ledger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The last summary written by a save or by the summary-only fallback.
    #[must_use]
    pub fn last_summary(&self) -> Option<LedgerSummary> {
        self.summary
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn check_fallbacks(&self) -> Result<(), LedgerError> {
        if self.fail_fallbacks.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable {
                message: "fallback writes disabled".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn load(&self) -> Result<Option<ResultLedger>, LedgerError> {
        if self.unreadable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable {
                message: "stored ledger is unreadable".to_string(),
            });
        }
        Ok(self.snapshot())
    }

    async fn save(
        &self,
        ledger: &ResultLedger,
        summary: &LedgerSummary,
    ) -> Result<(), LedgerError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable {
                message: "writes disabled".to_string(),
            });
        }
        *self.ledger.lock().unwrap_or_else(PoisonError::into_inner) = Some(ledger.clone());
        *self.summary.lock().unwrap_or_else(PoisonError::into_inner) = Some(summary.clone());
        Ok(())
    }

    async fn save_chunked(
        &self,
        ledger: &ResultLedger,
        chunk_size: usize,
    ) -> Result<usize, LedgerError> {
        self.chunked_saves.fetch_add(1, Ordering::SeqCst);
        self.check_fallbacks()?;
        Ok(ledger.len().div_ceil(chunk_size.max(1)))
    }

    async fn save_summary(&self, summary: &LedgerSummary) -> Result<(), LedgerError> {
        self.summary_saves.fetch_add(1, Ordering::SeqCst);
        self.check_fallbacks()?;
        *self.summary.lock().unwrap_or_else(PoisonError::into_inner) = Some(summary.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assembly_ledger_models::FetchOutcome;
    use serde_json::json;

    #[tokio::test]
    async fn counts_saves_and_keeps_last_ledger() {
        let store = MemoryLedgerStore::new();
        let ledger = ResultLedger::from(vec![FetchOutcome::no_data("K", json!(null))]);

        store.save(&ledger, &ledger.summary()).await.unwrap();
        store.save(&ledger, &ledger.summary()).await.unwrap();

        assert_eq!(store.save_count(), 2);
        assert_eq!(store.load().await.unwrap().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failing_saves_leave_previous_ledger() {
        let store = MemoryLedgerStore::with_ledger(ResultLedger::new());
        store.set_fail_saves(true);
        let ledger = ResultLedger::from(vec![FetchOutcome::no_data("K", json!(null))]);

        assert!(store.save(&ledger, &ledger.summary()).await.is_err());
        assert!(store.snapshot().unwrap().is_empty());
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn failing_fallbacks_are_counted() {
        let store = MemoryLedgerStore::new();
        store.set_fail_fallbacks(true);
        let ledger = ResultLedger::from(vec![FetchOutcome::no_data("K", json!(null))]);

        assert!(store.save_chunked(&ledger, 10).await.is_err());
        assert!(store.save_summary(&ledger.summary()).await.is_err());

        assert_eq!(store.chunked_save_count(), 1);
        assert_eq!(store.summary_save_count(), 1);
        assert!(store.last_summary().is_none());
    }
}
