#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Passed-bill filtering.
//!
//! Reads the per-term bill files written by the `bills` dataset, keeps the
//! bills that passed, and turns them into [`BillRef`] work items for the
//! vote and conference fetches.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Filename of the filtered bill list.
pub const FILTERED_BILLS_FILE: &str = "assembly_filtered_bills_passed.json";

/// Older filename still accepted when loading.
pub const LEGACY_FILTERED_BILLS_FILE: &str = "assembly_filtered_passed_bills.json";

/// Prefix of the per-term bill files.
pub const BILL_FILE_PREFIX: &str = "assembly_bills_age";

/// Earliest assembly term kept by default.
pub const DEFAULT_MIN_AGE: u32 = 17;

/// `PROC_RESULT` values that mean the bill passed.
pub const PASSED_RESULTS: [&str; 2] = ["원안가결", "수정가결"];

/// Plenary vote service, queried by `BILL_ID` and `AGE`.
pub const VOTES_SERVICE: &str = "nojepdqqaweusdfbi";

/// Conference record service, queried by `BILL_ID`.
pub const CONFERENCES_SERVICE: &str = "VCONFBILLCONFLIST";

/// Errors from reading or writing bill lists.
#[derive(Debug, thiserror::Error)]
pub enum BillsError {
    /// A filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A file was not valid JSON of the expected shape.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Neither filtered bill file exists.
    #[error("No filtered bill list found in {dir}")]
    NotFound {
        /// Directory that was searched.
        dir: PathBuf,
    },
}

/// A bill to fetch per-bill data for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BillRef {
    /// `BILL_ID`, e.g. `PRC_X2Y0Z...`.
    #[serde(rename = "BILL_ID")]
    pub bill_id: String,
    /// Assembly term, kept as text since the API returns it both ways.
    #[serde(rename = "AGE", deserialize_with = "text_or_number")]
    pub age: String,
}

impl BillRef {
    /// Creates a bill reference.
    #[must_use]
    pub fn new(bill_id: &str, age: &str) -> Self {
        Self {
            bill_id: bill_id.to_string(),
            age: age.to_string(),
        }
    }

    /// Ledger key: `"{BILL_ID}_{AGE}"`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}_{}", self.bill_id, self.age)
    }
}

/// Query parameters for the plenary vote service.
#[must_use]
pub fn vote_params(bill: &BillRef) -> Vec<(&'static str, String)> {
    vec![("BILL_ID", bill.bill_id.clone()), ("AGE", bill.age.clone())]
}

/// Query parameters for the conference record service.
#[must_use]
pub fn conference_params(bill: &BillRef) -> Vec<(&'static str, String)> {
    vec![("BILL_ID", bill.bill_id.clone())]
}

fn text_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

/// The filtered bill list as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilteredBills {
    /// Number of entries in `data`.
    pub total_count: usize,
    /// When the list was produced, ISO 8601.
    pub filtered_date: String,
    /// Human-readable description of the filter.
    pub filter_criteria: String,
    /// Unique passed bills.
    pub data: Vec<BillRef>,
}

impl FilteredBills {
    /// Wraps `data` with the current timestamp.
    #[must_use]
    pub fn new(data: Vec<BillRef>, min_age: u32) -> Self {
        Self {
            total_count: data.len(),
            filtered_date: Utc::now().to_rfc3339(),
            filter_criteria: format!(
                "PROC_RESULT = '{}' OR '{}', AGE >= {min_age}",
                PASSED_RESULTS[0], PASSED_RESULTS[1]
            ),
            data,
        }
    }
}

fn age_of(record: &Value) -> Option<u32> {
    match record.get("AGE")? {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn is_passed(record: &Value) -> bool {
    record
        .get("PROC_RESULT")
        .and_then(Value::as_str)
        .is_some_and(|r| PASSED_RESULTS.contains(&r))
}

/// Returns the passed bills from `records` with `AGE >= min_age`, without
/// deduplication.
#[must_use]
pub fn passed_bills(records: &[Value], min_age: u32) -> Vec<BillRef> {
    records
        .iter()
        .filter(|r| is_passed(r))
        .filter_map(|r| {
            let age = age_of(r)?;
            if age < min_age {
                return None;
            }
            let bill_id = r.get("BILL_ID")?.as_str()?;
            Some(BillRef::new(bill_id, &age.to_string()))
        })
        .collect()
}

/// Removes repeated `BILL_ID`s, keeping the first occurrence.
#[must_use]
pub fn dedup_by_bill_id(bills: Vec<BillRef>) -> Vec<BillRef> {
    let mut seen = HashSet::new();
    bills
        .into_iter()
        .filter(|b| seen.insert(b.bill_id.clone()))
        .collect()
}

/// Filters and deduplicates one batch of bill records.
#[must_use]
pub fn filter_passed_bills(records: &[Value], min_age: u32) -> Vec<BillRef> {
    dedup_by_bill_id(passed_bills(records, min_age))
}

/// Lists the per-term bill files in `dir`, sorted by name.
///
/// # Errors
///
/// Returns [`BillsError::Io`] if the directory cannot be read.
pub fn bill_files(dir: &Path) -> Result<Vec<PathBuf>, BillsError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(BILL_FILE_PREFIX) && n.ends_with(".json"))
        })
        .collect();
    files.sort();
    Ok(files)
}

fn read_records(path: &Path) -> Result<Option<Vec<Value>>, BillsError> {
    let bytes = std::fs::read(path)?;
    let mut doc: Value = serde_json::from_slice(&bytes)?;
    match doc.get_mut("data").map(Value::take) {
        Some(Value::Array(rows)) => Ok(Some(rows)),
        _ => Ok(None),
    }
}

/// Reads every per-term bill file in `dir` and returns the unique passed
/// bills. Unreadable or malformed files are logged and skipped.
///
/// # Errors
///
/// Returns [`BillsError::Io`] if the directory cannot be read.
pub fn filter_bill_files(dir: &Path, min_age: u32) -> Result<FilteredBills, BillsError> {
    let files = bill_files(dir)?;
    log::info!("Found {} assembly bills files to process", files.len());

    let mut all = Vec::new();
    for path in &files {
        let name = path.display();
        match read_records(path) {
            Ok(Some(records)) => {
                let passed = passed_bills(&records, min_age);
                log::info!("Found {} matching records in {name}", passed.len());
                all.extend(passed);
            }
            Ok(None) => log::warn!("Skipping {name} - no data array found"),
            Err(e) => log::error!("Error processing file {name}: {e}"),
        }
    }

    let total = all.len();
    let unique = dedup_by_bill_id(all);
    log::info!(
        "Total filtered records: {total}, unique after deduplication: {}",
        unique.len()
    );

    Ok(FilteredBills::new(unique, min_age))
}

/// Writes the filtered bill list to `dir`.
///
/// # Errors
///
/// Returns [`BillsError`] if serialization or the write fails.
pub fn save_filtered_bills(dir: &Path, bills: &FilteredBills) -> Result<PathBuf, BillsError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(FILTERED_BILLS_FILE);
    std::fs::write(&path, serde_json::to_vec_pretty(bills)?)?;
    Ok(path)
}

/// Loads the filtered bill list from `dir`, falling back to the legacy
/// filename.
///
/// # Errors
///
/// Returns [`BillsError::NotFound`] if neither file exists, or another
/// [`BillsError`] if the file cannot be parsed.
pub fn load_filtered_bills(dir: &Path) -> Result<FilteredBills, BillsError> {
    for name in [FILTERED_BILLS_FILE, LEGACY_FILTERED_BILLS_FILE] {
        let path = dir.join(name);
        if path.exists() {
            let bytes = std::fs::read(&path)?;
            return Ok(serde_json::from_slice(&bytes)?);
        }
    }
    Err(BillsError::NotFound {
        dir: dir.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, age: Value, result: &str) -> Value {
        json!({"BILL_ID": id, "AGE": age, "PROC_RESULT": result})
    }

    #[test]
    fn keeps_passed_bills_from_recent_terms() {
        let records = vec![
            record("A", json!("21"), "원안가결"),
            record("B", json!(21), "수정가결"),
            record("C", json!("21"), "폐기"),
            record("D", json!("16"), "원안가결"),
            record("E", json!("17"), "원안가결"),
        ];

        let ids: Vec<String> = filter_passed_bills(&records, DEFAULT_MIN_AGE)
            .into_iter()
            .map(|b| b.bill_id)
            .collect();

        assert_eq!(ids, vec!["A", "B", "E"]);
    }

    #[test]
    fn duplicate_bill_ids_keep_first() {
        let records = vec![
            record("A", json!("20"), "원안가결"),
            record("A", json!("21"), "수정가결"),
        ];

        let bills = filter_passed_bills(&records, DEFAULT_MIN_AGE);

        assert_eq!(bills, vec![BillRef::new("A", "20")]);
    }

    #[test]
    fn key_joins_id_and_age() {
        assert_eq!(BillRef::new("PRC_1", "21").key(), "PRC_1_21");
    }

    #[test]
    fn numeric_age_deserializes_as_text() {
        let bill: BillRef = serde_json::from_value(json!({"BILL_ID": "X", "AGE": 22})).unwrap();
        assert_eq!(bill.age, "22");
    }

    #[test]
    fn service_params() {
        let bill = BillRef::new("PRC_1", "21");
        assert_eq!(
            vote_params(&bill),
            vec![("BILL_ID", "PRC_1".to_string()), ("AGE", "21".to_string())]
        );
        assert_eq!(conference_params(&bill), vec![("BILL_ID", "PRC_1".to_string())]);
    }

    #[test]
    fn filters_files_and_skips_broken_ones() {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, body: &Value| {
            std::fs::write(dir.path().join(name), serde_json::to_vec(body).unwrap()).unwrap();
        };

        write(
            "assembly_bills_age_20.json",
            &json!({"data": [record("A", json!("20"), "원안가결")]}),
        );
        write(
            "assembly_bills_age_21.json",
            &json!({"data": [record("A", json!("21"), "원안가결"), record("B", json!("21"), "수정가결")]}),
        );
        write("assembly_bills_age_22.json", &json!({"nothing": true}));
        std::fs::write(dir.path().join("assembly_bills_age_19.json"), b"{not json").unwrap();
        write(
            "assembly_members_profile.json",
            &json!({"data": [record("Z", json!("21"), "원안가결")]}),
        );

        let filtered = filter_bill_files(dir.path(), DEFAULT_MIN_AGE).unwrap();

        assert_eq!(filtered.total_count, 2);
        assert_eq!(
            filtered.data,
            vec![BillRef::new("A", "20"), BillRef::new("B", "21")]
        );
    }

    #[test]
    fn saved_list_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let bills = FilteredBills::new(vec![BillRef::new("A", "21")], DEFAULT_MIN_AGE);

        save_filtered_bills(dir.path(), &bills).unwrap();
        let loaded = load_filtered_bills(dir.path()).unwrap();

        assert_eq!(loaded.data, bills.data);
        assert!(loaded.filter_criteria.contains("AGE >= 17"));
    }

    #[test]
    fn legacy_filename_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(LEGACY_FILTERED_BILLS_FILE),
            serde_json::to_vec(&json!({
                "total_count": 1,
                "filtered_date": "2024-05-01T00:00:00.123456",
                "filter_criteria": "legacy",
                "data": [{"BILL_ID": "A", "AGE": "21"}]
            }))
            .unwrap(),
        )
        .unwrap();

        let loaded = load_filtered_bills(dir.path()).unwrap();
        assert_eq!(loaded.data[0].bill_id, "A");
    }

    #[test]
    fn missing_list_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_filtered_bills(dir.path()),
            Err(BillsError::NotFound { .. })
        ));
    }
}
