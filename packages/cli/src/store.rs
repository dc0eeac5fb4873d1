//! Ledger store selection.

use std::path::Path;

use assembly_ledger::LedgerStore;
use assembly_ledger_models::LegacyKey;
use assembly_ledger::json_file::JsonFileLedgerStore;
use assembly_database::ledger_store::DuckDbLedgerStore;

/// Where fetch ledgers are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum StoreKind {
    /// `{ summary, results }` JSON files in the data directory.
    #[default]
    Json,
    /// Named ledgers inside the `DuckDB` database.
    Duckdb,
}

impl StoreKind {
    pub const ALL: &[Self] = &[Self::Json, Self::Duckdb];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Json => "JSON files",
            Self::Duckdb => "DuckDB database",
        }
    }
}

/// A named ledger: its `DuckDB` name and its JSON filename.
#[derive(Debug, Clone, Copy)]
pub struct LedgerSpec {
    pub name: &'static str,
    pub json_file: &'static str,
    /// Keys for entries of a JSON file in the older per-bill layout. Must
    /// match the key the step fetches with.
    pub legacy_keys: LegacyKey,
}

pub const VOTES_LEDGER: LedgerSpec = LedgerSpec {
    name: "votes",
    json_file: "assembly_bills_api_results.json",
    legacy_keys: LegacyKey::BillAndAge,
};

pub const CONFERENCES_LEDGER: LedgerSpec = LedgerSpec {
    name: "conferences",
    json_file: "assembly_bills_conference_api_results.json",
    legacy_keys: LegacyKey::Bill,
};

pub const PDF_DOWNLOADS_LEDGER: LedgerSpec = LedgerSpec {
    name: "pdf_downloads",
    json_file: assembly_pdf::DOWNLOAD_LEDGER_FILE,
    legacy_keys: LegacyKey::BillAndAge,
};

/// Opens the store for `spec` under `data_dir`.
///
/// # Errors
///
/// Returns an error if the `DuckDB` database cannot be opened.
pub fn open_store(
    kind: StoreKind,
    data_dir: &Path,
    spec: LedgerSpec,
) -> Result<Box<dyn LedgerStore>, Box<dyn std::error::Error>> {
    Ok(match kind {
        StoreKind::Json => Box::new(
            JsonFileLedgerStore::new(data_dir.join(spec.json_file))
                .with_legacy_keys(spec.legacy_keys),
        ),
        StoreKind::Duckdb => {
            let path = assembly_database::paths::database_path(data_dir);
            Box::new(DuckDbLedgerStore::open(&path, spec.name)?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_store_points_into_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(StoreKind::Json, dir.path(), VOTES_LEDGER).unwrap();
        assert!(store.describe().contains("assembly_bills_api_results.json"));
    }

    #[tokio::test]
    async fn older_ledger_files_keep_their_fetched_keys() {
        let dir = tempfile::tempdir().unwrap();
        let entry = r#"{"summary": {"total_bills_processed": 1, "successful_calls": 0},
            "results": [{"BILL_ID": "PRC_A", "AGE": 21, "status": "no_data",
                         "api_response": null, "timestamp": "2024-05-01T10:20:30.5"}]}"#;
        std::fs::write(dir.path().join(VOTES_LEDGER.json_file), entry).unwrap();
        std::fs::write(dir.path().join(CONFERENCES_LEDGER.json_file), entry).unwrap();
        let bill = assembly_bills::BillRef::new("PRC_A", "21");

        let votes = open_store(StoreKind::Json, dir.path(), VOTES_LEDGER)
            .unwrap()
            .load()
            .await
            .unwrap()
            .unwrap();
        let conferences = open_store(StoreKind::Json, dir.path(), CONFERENCES_LEDGER)
            .unwrap()
            .load()
            .await
            .unwrap()
            .unwrap();

        assert!(votes.resolved_keys().contains(bill.key().as_str()));
        assert!(conferences.resolved_keys().contains(bill.bill_id.as_str()));
    }

    #[test]
    fn duckdb_store_uses_ledger_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(StoreKind::Duckdb, dir.path(), CONFERENCES_LEDGER).unwrap();
        assert!(store.describe().ends_with("#conferences"));
        assert!(dir.path().join("assembly.duckdb").exists());
    }
}
