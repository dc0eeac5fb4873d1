//! Ledger stored as a single pretty-printed JSON document.
//!
//! The document has the `{ "summary": {...}, "results": [...] }` shape that
//! downstream steps (PDF planning, vote loading) read back. Writes go to a
//! `.tmp` sibling first and are renamed into place, so a crash mid-write
//! never leaves a truncated ledger behind.

use std::path::{Path, PathBuf};

use assembly_ledger_models::{
    LedgerChunk, LedgerDocument, LedgerSummary, LegacyKey, LegacyLedgerDocument, ResultLedger,
};

use crate::{LedgerError, LedgerStore};

/// A [`LedgerStore`] backed by one JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileLedgerStore {
    path: PathBuf,
    legacy_keys: LegacyKey,
}

impl JsonFileLedgerStore {
    /// Creates a store for the ledger file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            legacy_keys: LegacyKey::default(),
        }
    }

    /// Sets how keys are rebuilt when the file is in the older layout.
    #[must_use]
    pub const fn with_legacy_keys(mut self, keys: LegacyKey) -> Self {
        self.legacy_keys = keys;
        self
    }

    /// The ledger file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of a sibling file named `<stem>_<suffix>.json`.
    fn sibling(&self, suffix: &str) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .map_or_else(|| "ledger".to_string(), |s| s.to_string_lossy().into_owned());
        self.path.with_file_name(format!("{stem}_{suffix}.json"))
    }

    /// Path of the `n`-th chunk file written by [`LedgerStore::save_chunked`].
    #[must_use]
    pub fn chunk_path(&self, n: usize) -> PathBuf {
        self.sibling(&format!("chunk_{n}"))
    }

    /// Path of the summary file written by [`LedgerStore::save_summary`].
    #[must_use]
    pub fn summary_path(&self) -> PathBuf {
        self.sibling("summary")
    }
}

/// Reads a ledger document from `path`. Files in the older per-bill layout
/// are converted, with `"{BILL_ID}_{AGE}"` keys.
///
/// # Errors
///
/// Returns [`LedgerError`] if the file cannot be read or matches neither
/// layout.
pub async fn read_document(path: &Path) -> Result<LedgerDocument, LedgerError> {
    read_document_with_keys(path, LegacyKey::default()).await
}

/// Like [`read_document`], rebuilding older-layout keys with `keys`.
///
/// # Errors
///
/// Returns [`LedgerError`] if the file cannot be read or matches neither
/// layout.
pub async fn read_document_with_keys(
    path: &Path,
    keys: LegacyKey,
) -> Result<LedgerDocument, LedgerError> {
    let bytes = tokio::fs::read(path).await?;
    match serde_json::from_slice::<LedgerDocument>(&bytes) {
        Ok(document) => Ok(document),
        Err(e) => {
            let Ok(legacy) = serde_json::from_slice::<LegacyLedgerDocument>(&bytes) else {
                return Err(e.into());
            };
            log::info!(
                "Converting {} entries from the older ledger layout in {}",
                legacy.results.len(),
                path.display()
            );
            Ok(legacy.into_document(keys))
        }
    }
}

/// Writes `bytes` to `path` through a temporary sibling and a rename.
///
/// # Errors
///
/// Returns [`LedgerError::Io`] if any filesystem step fails.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), LedgerError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait::async_trait]
impl LedgerStore for JsonFileLedgerStore {
    async fn load(&self) -> Result<Option<ResultLedger>, LedgerError> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(None);
        }
        let document = read_document_with_keys(&self.path, self.legacy_keys).await?;
        log::debug!(
            "Loaded {} outcomes from {}",
            document.results.len(),
            self.path.display()
        );
        Ok(Some(ResultLedger::from(document)))
    }

    async fn save(
        &self,
        ledger: &ResultLedger,
        summary: &LedgerSummary,
    ) -> Result<(), LedgerError> {
        let document = ledger.to_document(summary.clone());
        let bytes = serde_json::to_vec_pretty(&document)?;
        write_atomic(&self.path, &bytes).await?;
        log::debug!(
            "Saved {} outcomes ({} bytes) to {}",
            ledger.len(),
            bytes.len(),
            self.path.display()
        );
        Ok(())
    }

    async fn save_chunked(
        &self,
        ledger: &ResultLedger,
        chunk_size: usize,
    ) -> Result<usize, LedgerError> {
        let chunk_size = chunk_size.max(1);
        let mut written = 0;

        for (i, chunk) in ledger.outcomes().chunks(chunk_size).enumerate() {
            let n = i + 1;
            let document = LedgerChunk {
                chunk_number: n as u64,
                data: chunk.to_vec(),
            };
            let path = self.chunk_path(n);
            write_atomic(&path, &serde_json::to_vec_pretty(&document)?).await?;
            log::info!("Chunk {n} saved to {}", path.display());
            written = n;
        }

        Ok(written)
    }

    async fn save_summary(&self, summary: &LedgerSummary) -> Result<(), LedgerError> {
        let path = self.summary_path();
        write_atomic(&path, &serde_json::to_vec_pretty(summary)?).await?;
        log::info!("Summary saved to {}", path.display());
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
