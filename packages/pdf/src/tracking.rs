//! Download planning: which conference PDFs exist and which are missing.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use assembly_ledger_models::ResultLedger;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    ConferenceRow, DOWNLOADS_DIR_NAME, FilenameParts, PdfError, conference_rows,
    legacy_filename_from_parts, pdf_filename,
};

/// A single conference PDF to download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdfTarget {
    pub bill_id: String,
    pub bill_name: Option<String>,
    pub conference_kind: Option<String>,
    pub conference_id: Option<String>,
    pub eraco: Option<String>,
    pub session: Option<String>,
    pub degree: Option<String>,
    pub conference_date: Option<String>,
    pub download_url: String,
    pub filename: String,
    /// `pdf_downloads/<BILL_ID>/<filename>`, relative to the data directory.
    pub relative_path: String,
    /// Whether the file was on disk when the plan was made.
    pub file_exists: bool,
    pub tracked_date: String,
}

impl PdfTarget {
    /// Builds a target for `row` of bill `bill_id`. Returns `None` when the
    /// row has no download URL.
    #[must_use]
    pub fn from_row(bill_id: &str, row: &ConferenceRow) -> Option<Self> {
        let download_url = row.download_url.clone().filter(|u| !u.is_empty())?;
        let filename = pdf_filename(row);
        let relative_path = format!("{DOWNLOADS_DIR_NAME}/{bill_id}/{filename}");

        Some(Self {
            bill_id: bill_id.to_string(),
            bill_name: row.bill_name.clone(),
            conference_kind: row.conference_kind.clone(),
            conference_id: row.conference_id.clone(),
            eraco: row.eraco.clone(),
            session: row.session.clone(),
            degree: row.degree.clone(),
            conference_date: row.conference_date.clone(),
            download_url,
            filename,
            relative_path,
            file_exists: false,
            tracked_date: Utc::now().to_rfc3339(),
        })
    }

    /// Ledger key identifying this download.
    #[must_use]
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.bill_id,
            self.conference_id.as_deref().unwrap_or_default(),
            self.bill_name.as_deref().unwrap_or_default(),
            self.download_url
        )
    }

    /// Absolute location of the file under `data_dir`.
    #[must_use]
    pub fn local_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.relative_path)
    }

    fn filename_parts(&self) -> FilenameParts<'_> {
        [
            self.conference_kind.as_deref(),
            self.conference_id.as_deref(),
            self.eraco.as_deref(),
            self.session.as_deref(),
            self.degree.as_deref(),
            self.conference_date.as_deref(),
        ]
    }

    /// Points the target at a file saved under the older naming, if one is
    /// on disk. Returns whether the target was switched.
    fn adopt_legacy_file(&mut self, data_dir: &Path) -> bool {
        let legacy = legacy_filename_from_parts(self.filename_parts());
        if legacy == self.filename {
            return false;
        }
        let relative_path = format!("{DOWNLOADS_DIR_NAME}/{}/{legacy}", self.bill_id);
        if !data_dir.join(&relative_path).is_file() {
            return false;
        }
        self.filename = legacy;
        self.relative_path = relative_path;
        true
    }
}

/// Counts written alongside the tracked targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingSummary {
    pub total_pdfs_tracked: usize,
    pub total_existing_files: usize,
    pub total_to_download: usize,
    pub total_skipped: usize,
    pub generated_date: String,
}

/// The tracking report: every known target plus counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingReport {
    pub summary: TrackingSummary,
    pub pdfs: Vec<PdfTarget>,
}

impl TrackingReport {
    /// Targets whose file was missing when the plan was made.
    pub fn missing(&self) -> impl Iterator<Item = &PdfTarget> {
        self.pdfs.iter().filter(|p| !p.file_exists)
    }
}

/// Builds download targets from a conference ledger and marks the ones
/// already present under `data_dir`. Targets repeating an earlier key are
/// dropped and counted as skipped.
#[must_use]
pub fn plan_downloads(ledger: &ResultLedger, data_dir: &Path) -> TrackingReport {
    let found = conference_rows(ledger);

    let mut seen = HashSet::new();
    let mut duplicates = 0;
    let mut pdfs: Vec<PdfTarget> = Vec::new();
    for target in found
        .rows
        .iter()
        .filter_map(|(bill_id, row)| PdfTarget::from_row(bill_id, row))
    {
        if seen.insert(target.key()) {
            pdfs.push(target);
        } else {
            duplicates += 1;
        }
    }

    for target in &mut pdfs {
        target.file_exists =
            target.local_path(data_dir).is_file() || target.adopt_legacy_file(data_dir);
        if target.file_exists {
            log::debug!("  ✓ File already exists: {}", target.relative_path);
        } else {
            log::debug!("  ○ File to be downloaded: {}", target.relative_path);
        }
    }

    let existing = pdfs.iter().filter(|p| p.file_exists).count();

    TrackingReport {
        summary: TrackingSummary {
            total_pdfs_tracked: pdfs.len(),
            total_existing_files: existing,
            total_to_download: pdfs.len() - existing,
            total_skipped: found.skipped_results + duplicates,
            generated_date: Utc::now().to_rfc3339(),
        },
        pdfs,
    }
}

/// Writes the tracking report to `path`.
///
/// # Errors
///
/// Returns [`PdfError`] if serialization or the write fails.
pub fn save_tracking_report(path: &Path, report: &TrackingReport) -> Result<(), PdfError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_vec_pretty(report)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assembly_ledger_models::FetchOutcome;
    use serde_json::json;

    fn ledger() -> ResultLedger {
        let mut ledger = ResultLedger::new();
        ledger.push(FetchOutcome::success(
            "PRC_A",
            json!({"BILL_ID": "PRC_A", "AGE": "21"}),
            json!([
                {"head": [{"list_total_count": 2}]},
                {"row": [
                    {"BILL_ID": "PRC_A", "BILL_NM": "법안", "CONF_KND": "본회의", "CONF_ID": "1",
                     "ERACO": "제21대", "SESS": "제390회", "DGR": "3", "CONF_DT": "2021-09-30",
                     "DOWN_URL": "http://example.test/1.pdf"},
                    {"BILL_ID": "PRC_A", "BILL_NM": "법안", "CONF_KND": "위원회", "CONF_ID": "2",
                     "ERACO": "제21대", "SESS": "제389회", "DGR": "1", "CONF_DT": "2021-08-01",
                     "DOWN_URL": "http://example.test/2.pdf"}
                ]}
            ]),
        ));
        ledger
    }

    #[test]
    fn marks_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir
            .path()
            .join("pdf_downloads/PRC_A/본회의_1_제21대_제390회_3_2021-09-30.pdf");
        std::fs::create_dir_all(existing.parent().unwrap()).unwrap();
        std::fs::write(&existing, b"%PDF").unwrap();

        let report = plan_downloads(&ledger(), dir.path());

        assert_eq!(report.summary.total_pdfs_tracked, 2);
        assert_eq!(report.summary.total_existing_files, 1);
        assert_eq!(report.summary.total_to_download, 1);
        assert_eq!(report.missing().count(), 1);
        assert_eq!(
            report.missing().next().unwrap().relative_path,
            "pdf_downloads/PRC_A/위원회_2_제21대_제389회_1_2021-08-01.pdf"
        );
    }

    #[test]
    fn file_under_older_name_counts_as_existing() {
        let mut ledger = ResultLedger::new();
        ledger.push(FetchOutcome::success(
            "PRC_B",
            json!({"BILL_ID": "PRC_B", "AGE": "21"}),
            json!([
                {"head": [{"list_total_count": 1}]},
                {"row": [
                    {"BILL_ID": "PRC_B", "BILL_NM": "법안", "CONF_KND": "본회의 ", "CONF_ID": "7",
                     "ERACO": "제21대", "SESS": "제390회", "DGR": "", "CONF_DT": " ",
                     "DOWN_URL": "http://example.test/7.pdf"}
                ]}
            ]),
        ));
        let dir = tempfile::tempdir().unwrap();
        let legacy = dir
            .path()
            .join("pdf_downloads/PRC_B/본회의 _7_제21대_제390회___.pdf");
        std::fs::create_dir_all(legacy.parent().unwrap()).unwrap();
        std::fs::write(&legacy, b"%PDF").unwrap();

        let report = plan_downloads(&ledger, dir.path());

        assert_eq!(report.summary.total_existing_files, 1);
        assert_eq!(report.missing().count(), 0);
        let target = &report.pdfs[0];
        assert_eq!(target.filename, "본회의 _7_제21대_제390회___.pdf");
        assert_eq!(target.local_path(dir.path()), legacy);
    }

    #[test]
    fn missing_file_keeps_current_name() {
        let mut ledger = ResultLedger::new();
        ledger.push(FetchOutcome::success(
            "PRC_B",
            json!({"BILL_ID": "PRC_B"}),
            json!([{"row": [
                {"BILL_ID": "PRC_B", "CONF_KND": "본회의 ", "CONF_ID": "7",
                 "DOWN_URL": "http://example.test/7.pdf"}
            ]}]),
        ));

        let report = plan_downloads(&ledger, Path::new("/nonexistent"));

        assert_eq!(report.missing().count(), 1);
        assert_eq!(
            report.pdfs[0].relative_path,
            "pdf_downloads/PRC_B/본회의_7________.pdf"
        );
    }

    #[test]
    fn key_identifies_bill_conference_name_and_url() {
        let report = plan_downloads(&ledger(), Path::new("/nonexistent"));
        let key = report.pdfs[0].key();
        assert_eq!(key, "PRC_A|1|법안|http://example.test/1.pdf");
    }

    #[test]
    fn repeated_targets_are_dropped() {
        let mut ledger = ledger();
        let again = ledger.outcomes()[0].clone();
        ledger.push(again);

        let report = plan_downloads(&ledger, Path::new("/nonexistent"));

        assert_eq!(report.pdfs.len(), 2);
        assert_eq!(report.summary.total_skipped, 2);
    }

    #[test]
    fn report_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pdf_tracking_list.json");
        let report = plan_downloads(&ledger(), dir.path());

        save_tracking_report(&path, &report).unwrap();

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["summary"]["total_pdfs_tracked"], 2);
        assert_eq!(written["pdfs"].as_array().unwrap().len(), 2);
    }
}
