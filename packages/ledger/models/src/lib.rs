#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Fetch outcome, result ledger, and summary types.
//!
//! A [`ResultLedger`] is the ordered record of every [`FetchOutcome`]
//! produced by one or more runs of the batch fetcher. It is serialized as a
//! [`LedgerDocument`] (`{ summary, results }`) when written to a JSON file.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a single remote call resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    /// The call returned a non-empty payload.
    Success,
    /// The call returned a structurally valid but empty response.
    NoData,
    /// The call failed (network, timeout, malformed body, ...).
    Error,
}

impl FetchStatus {
    /// Returns the wire name of the status (`"success"`, `"no_data"`,
    /// `"error"`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NoData => "no_data",
            Self::Error => "error",
        }
    }

    /// Parses a wire name back into a status.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(Self::Success),
            "no_data" => Some(Self::NoData),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of attempting one work item's remote call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchOutcome {
    /// Deduplication key of the originating work item.
    pub key: String,
    /// The work item itself, as JSON, so the ledger is self-describing.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub item: serde_json::Value,
    /// How the call resolved.
    pub status: FetchStatus,
    /// Raw response payload (only for [`FetchStatus::Success`]).
    #[serde(default)]
    pub api_response: Option<serde_json::Value>,
    /// Failure message (only for [`FetchStatus::Error`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the outcome was recorded.
    pub timestamp: DateTime<Utc>,
}

impl FetchOutcome {
    /// Creates a successful outcome carrying `payload`.
    #[must_use]
    pub fn success(key: impl Into<String>, item: serde_json::Value, payload: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            item,
            status: FetchStatus::Success,
            api_response: Some(payload),
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Creates an outcome for a response that carried no data.
    #[must_use]
    pub fn no_data(key: impl Into<String>, item: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            item,
            status: FetchStatus::NoData,
            api_response: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Creates a failed outcome with the given message.
    #[must_use]
    pub fn error(key: impl Into<String>, item: serde_json::Value, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            item,
            status: FetchStatus::Error,
            api_response: None,
            error: Some(message.into()),
            timestamp: Utc::now(),
        }
    }

    /// Returns `true` if the outcome is a success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == FetchStatus::Success
    }
}

/// Counts derived from a ledger, written alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSummary {
    /// Number of outcomes in the ledger.
    pub total: u64,
    /// Outcomes with status `success`.
    pub successful: u64,
    /// Outcomes with status `error`.
    pub failed: u64,
    /// Outcomes with status `no_data`.
    pub no_data: u64,
    /// Entries dropped by the final deduplication pass.
    #[serde(default)]
    pub duplicates_removed: u64,
    /// Number of batches completed when this summary was taken, if it was
    /// written as a checkpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_completed: Option<u64>,
    /// When the summary was computed.
    pub processed_date: DateTime<Utc>,
}

/// The on-disk JSON shape of a ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerDocument {
    /// Derived counts.
    pub summary: LedgerSummary,
    /// Every outcome, in ledger order.
    pub results: Vec<FetchOutcome>,
}

/// How keys are rebuilt for entries of the older layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LegacyKey {
    /// `"{BILL_ID}_{AGE}"`
    #[default]
    BillAndAge,
    /// `"{BILL_ID}"`
    Bill,
}

/// An entry of the older per-bill ledger layout, which carries `BILL_ID`
/// and `AGE` inline instead of a `key` and an `item`.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyOutcome {
    #[serde(rename = "BILL_ID")]
    pub bill_id: String,
    #[serde(rename = "AGE", default)]
    pub age: Option<serde_json::Value>,
    pub status: FetchStatus,
    #[serde(default)]
    pub api_response: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    /// RFC 3339, or a local time without an offset.
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl LegacyOutcome {
    /// `AGE` as text, whether it was stored as a string or a number.
    #[must_use]
    pub fn age_text(&self) -> Option<String> {
        match self.age.as_ref()? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn recorded_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.timestamp.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .or_else(|_| {
                chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .map(|t| t.and_utc())
            })
            .ok()
    }

    /// Converts the entry, keeping `BILL_ID` and `AGE` as the item.
    #[must_use]
    pub fn into_outcome(self, keys: LegacyKey) -> FetchOutcome {
        let age = self.age_text();
        let key = match keys {
            LegacyKey::BillAndAge => {
                format!("{}_{}", self.bill_id, age.as_deref().unwrap_or_default())
            }
            LegacyKey::Bill => self.bill_id.clone(),
        };
        let timestamp = self.recorded_at().unwrap_or_else(Utc::now);

        let mut item = serde_json::Map::new();
        item.insert("BILL_ID".to_string(), self.bill_id.into());
        if let Some(age) = age {
            item.insert("AGE".to_string(), age.into());
        }

        FetchOutcome {
            key,
            item: serde_json::Value::Object(item),
            status: self.status,
            api_response: self.api_response,
            error: self.error,
            timestamp,
        }
    }
}

/// The older `{ summary, results }` layout. Its summary uses different
/// field names and is recomputed on conversion.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyLedgerDocument {
    pub results: Vec<LegacyOutcome>,
}

impl LegacyLedgerDocument {
    #[must_use]
    pub fn into_document(self, keys: LegacyKey) -> LedgerDocument {
        let ledger = ResultLedger::from(
            self.results
                .into_iter()
                .map(|o| o.into_outcome(keys))
                .collect::<Vec<_>>(),
        );
        ledger.to_document(ledger.summary())
    }
}

/// One chunk of a ledger written by the chunked fallback save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerChunk {
    /// One-based chunk number.
    pub chunk_number: u64,
    /// The outcomes in this chunk.
    pub data: Vec<FetchOutcome>,
}

/// The ordered collection of fetch outcomes accumulated across runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultLedger {
    outcomes: Vec<FetchOutcome>,
}

impl ResultLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            outcomes: Vec::new(),
        }
    }

    /// Number of outcomes (including duplicates not yet removed).
    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Returns `true` if the ledger holds no outcomes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Iterates the outcomes in ledger order.
    pub fn iter(&self) -> std::slice::Iter<'_, FetchOutcome> {
        self.outcomes.iter()
    }

    /// Borrows the outcomes as a slice.
    #[must_use]
    pub fn outcomes(&self) -> &[FetchOutcome] {
        &self.outcomes
    }

    /// Consumes the ledger, returning its outcomes.
    #[must_use]
    pub fn into_outcomes(self) -> Vec<FetchOutcome> {
        self.outcomes
    }

    /// Appends one outcome.
    pub fn push(&mut self, outcome: FetchOutcome) {
        self.outcomes.push(outcome);
    }

    /// Returns the set of keys present in the ledger.
    #[must_use]
    pub fn keys(&self) -> BTreeSet<&str> {
        self.outcomes.iter().map(|o| o.key.as_str()).collect()
    }

    /// Returns the keys whose latest outcome is not an error.
    ///
    /// Used when failed keys should be retried on the next run.
    #[must_use]
    pub fn resolved_keys(&self) -> BTreeSet<&str> {
        let mut latest: BTreeMap<&str, FetchStatus> = BTreeMap::new();
        for outcome in &self.outcomes {
            latest.insert(&outcome.key, outcome.status);
        }
        latest
            .into_iter()
            .filter(|(_, status)| *status != FetchStatus::Error)
            .map(|(key, _)| key)
            .collect()
    }

    /// Returns the latest outcome recorded for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&FetchOutcome> {
        self.outcomes.iter().rev().find(|o| o.key == key)
    }

    /// Removes duplicate keys, keeping the last outcome for each key at the
    /// position where the key first appeared.
    ///
    /// Returns the number of entries removed.
    pub fn dedup_last_wins(&mut self) -> usize {
        let before = self.outcomes.len();

        let mut last_index: BTreeMap<String, usize> = BTreeMap::new();
        for (i, outcome) in self.outcomes.iter().enumerate() {
            last_index.insert(outcome.key.clone(), i);
        }
        if last_index.len() == before {
            return 0;
        }

        let mut slots: Vec<Option<FetchOutcome>> =
            std::mem::take(&mut self.outcomes).into_iter().map(Some).collect();
        let mut emitted: BTreeSet<String> = BTreeSet::new();
        let mut deduped = Vec::with_capacity(last_index.len());

        for i in 0..slots.len() {
            let Some(key) = slots[i].as_ref().map(|o| o.key.clone()) else {
                continue;
            };
            if emitted.contains(&key) {
                continue;
            }
            if let Some(&last) = last_index.get(&key)
                && let Some(outcome) = slots[last].take()
            {
                deduped.push(outcome);
            }
            emitted.insert(key);
        }

        self.outcomes = deduped;
        before - self.outcomes.len()
    }

    /// Computes the summary counts for the ledger.
    #[must_use]
    pub fn summary(&self) -> LedgerSummary {
        let count = |status: FetchStatus| {
            self.outcomes.iter().filter(|o| o.status == status).count() as u64
        };

        LedgerSummary {
            total: self.outcomes.len() as u64,
            successful: count(FetchStatus::Success),
            failed: count(FetchStatus::Error),
            no_data: count(FetchStatus::NoData),
            duplicates_removed: 0,
            batch_completed: None,
            processed_date: Utc::now(),
        }
    }

    /// Builds the serializable document for this ledger.
    #[must_use]
    pub fn to_document(&self, summary: LedgerSummary) -> LedgerDocument {
        LedgerDocument {
            summary,
            results: self.outcomes.clone(),
        }
    }
}

impl From<Vec<FetchOutcome>> for ResultLedger {
    fn from(outcomes: Vec<FetchOutcome>) -> Self {
        Self { outcomes }
    }
}

impl From<LedgerDocument> for ResultLedger {
    fn from(document: LedgerDocument) -> Self {
        Self {
            outcomes: document.results,
        }
    }
}

impl Extend<FetchOutcome> for ResultLedger {
    fn extend<I: IntoIterator<Item = FetchOutcome>>(&mut self, iter: I) {
        self.outcomes.extend(iter);
    }
}

impl<'a> IntoIterator for &'a ResultLedger {
    type Item = &'a FetchOutcome;
    type IntoIter = std::slice::Iter<'a, FetchOutcome>;

    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.iter()
    }
}
