#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Conference record PDFs.
//!
//! The conference fetch stores one `VCONFBILLCONFLIST` payload per bill.
//! Each row of that payload may carry a `DOWN_URL` pointing at the
//! conference minutes. This crate turns those rows into [`tracking::PdfTarget`]s
//! with deterministic filenames, reports which files are already on disk,
//! and downloads the rest through the batch fetcher via
//! [`download::PdfDownloader`].

pub mod download;
pub mod tracking;

use assembly_ledger_models::ResultLedger;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Directory (under the data directory) that holds downloaded PDFs.
pub const DOWNLOADS_DIR_NAME: &str = "pdf_downloads";

/// Tracking report written by the planning step.
pub const TRACKING_FILE: &str = "pdf_tracking_list.json";

/// Ledger of download outcomes.
pub const DOWNLOAD_LEDGER_FILE: &str = "pdf_download_results.json";

/// Errors specific to PDF downloads.
#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    /// The HTTP download failed.
    #[error(transparent)]
    Api(#[from] assembly_api::ApiError),

    /// The response was empty.
    #[error("Empty response body from {url}")]
    Empty {
        /// The download URL.
        url: String,
    },

    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serializing the tracking report failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One row of a conference record payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConferenceRow {
    #[serde(rename = "BILL_ID", default, deserialize_with = "opt_text")]
    pub bill_id: Option<String>,
    #[serde(rename = "BILL_NM", default, deserialize_with = "opt_text")]
    pub bill_name: Option<String>,
    #[serde(rename = "CONF_KND", default, deserialize_with = "opt_text")]
    pub conference_kind: Option<String>,
    #[serde(rename = "CONF_ID", default, deserialize_with = "opt_text")]
    pub conference_id: Option<String>,
    #[serde(rename = "ERACO", default, deserialize_with = "opt_text")]
    pub eraco: Option<String>,
    #[serde(rename = "SESS", default, deserialize_with = "opt_text")]
    pub session: Option<String>,
    #[serde(rename = "DGR", default, deserialize_with = "opt_text")]
    pub degree: Option<String>,
    #[serde(rename = "CONF_DT", default, deserialize_with = "opt_text")]
    pub conference_date: Option<String>,
    #[serde(rename = "DOWN_URL", default, deserialize_with = "opt_text")]
    pub download_url: Option<String>,
}

fn opt_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

fn replace_invalid(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c => c,
        })
        .collect()
}

/// Replaces characters that are invalid in filenames with `_` and trims
/// the result. Missing, empty or blank input becomes `_`.
#[must_use]
pub fn sanitize_filename_part(text: Option<&str>) -> String {
    let sanitized = replace_invalid(text.unwrap_or_default());
    let trimmed = sanitized.trim();
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// The six name parts in filename order: `CONF_KND`, `CONF_ID`, `ERACO`,
/// `SESS`, `DGR`, `CONF_DT`.
pub type FilenameParts<'a> = [Option<&'a str>; 6];

/// `{CONF_KND}_{CONF_ID}_{ERACO}_{SESS}_{DGR}_{CONF_DT}.pdf`, every part
/// sanitized with [`sanitize_filename_part`].
#[must_use]
pub fn filename_from_parts(parts: FilenameParts<'_>) -> String {
    format!("{}.pdf", parts.map(sanitize_filename_part).join("_"))
}

/// The older naming some existing downloads use: parts are not trimmed,
/// except `CONF_DT`, whose blank value leaves an empty part. Only missing or
/// empty values become `_`.
#[must_use]
pub fn legacy_filename_from_parts(parts: FilenameParts<'_>) -> String {
    let last = parts.len() - 1;
    let names: Vec<String> = parts
        .iter()
        .copied()
        .enumerate()
        .map(|(i, part)| {
            let raw = part.filter(|p| !p.is_empty()).unwrap_or("_");
            let sanitized = replace_invalid(raw);
            if i == last {
                sanitized.trim().to_string()
            } else {
                sanitized
            }
        })
        .collect();
    format!("{}.pdf", names.join("_"))
}

impl ConferenceRow {
    /// The fields that make up the PDF filename.
    #[must_use]
    pub fn filename_parts(&self) -> FilenameParts<'_> {
        [
            self.conference_kind.as_deref(),
            self.conference_id.as_deref(),
            self.eraco.as_deref(),
            self.session.as_deref(),
            self.degree.as_deref(),
            self.conference_date.as_deref(),
        ]
    }
}

/// `{CONF_KND}_{CONF_ID}_{ERACO}_{SESS}_{DGR}_{CONF_DT}.pdf`
#[must_use]
pub fn pdf_filename(row: &ConferenceRow) -> String {
    filename_from_parts(row.filename_parts())
}

/// Conference rows extracted from a ledger.
#[derive(Debug, Default)]
pub struct ConferenceRows {
    /// Rows with a `DOWN_URL`, paired with the bill they belong to.
    pub rows: Vec<(String, ConferenceRow)>,
    /// Successful outcomes that yielded no usable rows.
    pub skipped_results: usize,
    /// Rows dropped for lacking a download URL.
    pub rows_without_url: usize,
}

/// Collects downloadable rows from the successful outcomes of a
/// conference ledger. The bill id falls back to the first row's `BILL_ID`
/// when a row omits it.
#[must_use]
pub fn conference_rows(ledger: &ResultLedger) -> ConferenceRows {
    let mut out = ConferenceRows::default();

    for outcome in ledger.iter().filter(|o| o.is_success()) {
        let rows: Vec<ConferenceRow> = outcome
            .api_response
            .as_ref()
            .and_then(assembly_api::envelope::rows)
            .map(|rows| {
                rows.iter()
                    .filter_map(|r| serde_json::from_value(r.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();

        let Some(first_bill) = rows.first().and_then(|r| r.bill_id.clone()) else {
            log::debug!("No BILL_ID found in result {}", outcome.key);
            out.skipped_results += 1;
            continue;
        };

        for row in rows {
            if row.download_url.as_deref().is_none_or(str::is_empty) {
                out.rows_without_url += 1;
                continue;
            }
            let bill_id = row.bill_id.clone().unwrap_or_else(|| first_bill.clone());
            out.rows.push((bill_id, row));
        }
    }

    out
}
