#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Durable storage for fetch ledgers.
//!
//! The batch fetcher talks to storage only through the [`LedgerStore`]
//! trait. Two backends live here: [`json_file::JsonFileLedgerStore`] (the
//! `{ summary, results }` JSON document the pipeline steps exchange) and
//! [`memory::MemoryLedgerStore`] (tests and dry runs). A `DuckDB` backend
//! lives in `assembly_database`.

pub mod json_file;
pub mod memory;

use assembly_ledger_models::{LedgerSummary, ResultLedger};

/// Errors that can occur while loading or saving a ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// A filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The ledger could not be serialized or parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A database-backed store failed.
    #[error("Database error: {message}")]
    Database {
        /// Description of what went wrong.
        message: String,
    },

    /// The store cannot accept writes right now.
    #[error("Ledger store unavailable: {message}")]
    Unavailable {
        /// Description of what went wrong.
        message: String,
    },

    /// The store does not implement the requested operation.
    #[error("Operation not supported by this ledger store: {0}")]
    Unsupported(&'static str),
}

/// Durable backing for a [`ResultLedger`].
///
/// `save` replaces the stored ledger wholesale; it is called once per
/// completed batch and once more after deduplication. The fallback methods
/// are only used when the final `save` fails.
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    /// Loads the stored ledger, or `None` if nothing has been saved yet.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if stored data exists but cannot be read.
    async fn load(&self) -> Result<Option<ResultLedger>, LedgerError>;

    /// Replaces the stored ledger.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the write fails.
    async fn save(&self, ledger: &ResultLedger, summary: &LedgerSummary)
    -> Result<(), LedgerError>;

    /// Writes the ledger as several smaller records of at most
    /// `chunk_size` outcomes each.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Unsupported`] by default.
    async fn save_chunked(
        &self,
        _ledger: &ResultLedger,
        _chunk_size: usize,
    ) -> Result<usize, LedgerError> {
        Err(LedgerError::Unsupported("save_chunked"))
    }

    /// Writes only the summary counts.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Unsupported`] by default.
    async fn save_summary(&self, _summary: &LedgerSummary) -> Result<(), LedgerError> {
        Err(LedgerError::Unsupported("save_summary"))
    }

    /// Human-readable location of the store, for log messages.
    fn describe(&self) -> String;
}

#[async_trait::async_trait]
impl<T: LedgerStore + ?Sized> LedgerStore for Box<T> {
    async fn load(&self) -> Result<Option<ResultLedger>, LedgerError> {
        (**self).load().await
    }

    async fn save(
        &self,
        ledger: &ResultLedger,
        summary: &LedgerSummary,
    ) -> Result<(), LedgerError> {
        (**self).save(ledger, summary).await
    }

    async fn save_chunked(
        &self,
        ledger: &ResultLedger,
        chunk_size: usize,
    ) -> Result<usize, LedgerError> {
        (**self).save_chunked(ledger, chunk_size).await
    }

    async fn save_summary(&self, summary: &LedgerSummary) -> Result<(), LedgerError> {
        (**self).save_summary(summary).await
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
