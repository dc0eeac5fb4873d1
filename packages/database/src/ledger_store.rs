//! Fetch ledgers stored in `DuckDB`.
//!
//! Several named ledgers share the `fetch_outcomes` table, keyed by
//! `(ledger, position)`. A save deletes and rewrites the named ledger inside
//! one transaction, so readers never see a half-written ledger.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use assembly_ledger::{LedgerError, LedgerStore};
use assembly_ledger_models::{FetchOutcome, FetchStatus, LedgerSummary, ResultLedger};
use chrono::{DateTime, Utc};
use duckdb::{Connection, params};

use crate::DbError;

/// One `fetch_outcomes` row, pre-serialized so it can cross into a
/// blocking task.
type OutcomeRow = (
    i64,
    String,
    &'static str,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
);

/// A [`LedgerStore`] backed by a `DuckDB` connection.
#[derive(Clone)]
pub struct DuckDbLedgerStore {
    conn: Arc<Mutex<Connection>>,
    ledger: String,
    location: String,
}

impl std::fmt::Debug for DuckDbLedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDbLedgerStore")
            .field("ledger", &self.ledger)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl DuckDbLedgerStore {
    /// Opens the database at `path` and binds the store to ledger `name`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the database cannot be opened.
    pub fn open(path: &Path, name: &str) -> Result<Self, DbError> {
        let conn = crate::open(path)?;
        Ok(Self::with_connection(conn, name, &path.display().to_string()))
    }

    /// Wraps an already-open connection (whose schema exists).
    #[must_use]
    pub fn with_connection(conn: Connection, name: &str, location: &str) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            ledger: name.to_string(),
            location: location.to_string(),
        }
    }

    /// The ledger name rows are stored under.
    #[must_use]
    pub fn ledger_name(&self) -> &str {
        &self.ledger
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn with_conn<R, F>(&self, f: F) -> Result<R, LedgerError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<R, DbError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut guard)
        })
        .await
        .map_err(|e| LedgerError::Database {
            message: format!("blocking task failed: {e}"),
        })?
        .map_err(into_ledger_error)
    }
}

fn into_ledger_error(e: DbError) -> LedgerError {
    match e {
        DbError::Json(e) => LedgerError::Json(e),
        DbError::Io(e) => LedgerError::Io(e),
        other => LedgerError::Database {
            message: other.to_string(),
        },
    }
}

fn to_row(position: usize, outcome: &FetchOutcome) -> Result<OutcomeRow, DbError> {
    let position = i64::try_from(position).map_err(|e| DbError::Conversion {
        message: e.to_string(),
    })?;
    let item = if outcome.item.is_null() {
        None
    } else {
        Some(serde_json::to_string(&outcome.item)?)
    };
    let api_response = outcome
        .api_response
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    Ok((
        position,
        outcome.key.clone(),
        outcome.status.as_str(),
        item,
        api_response,
        outcome.error.clone(),
        outcome.timestamp.to_rfc3339(),
    ))
}

fn from_row(
    key: String,
    status: &str,
    item: Option<&str>,
    api_response: Option<&str>,
    error: Option<String>,
    fetched_at: &str,
) -> Result<FetchOutcome, DbError> {
    let status = FetchStatus::parse(status).ok_or_else(|| DbError::Conversion {
        message: format!("unknown status {status:?} for key {key}"),
    })?;
    let timestamp = DateTime::parse_from_rfc3339(fetched_at)
        .map_err(|e| DbError::Conversion {
            message: format!("bad timestamp {fetched_at:?}: {e}"),
        })?
        .with_timezone(&Utc);

    Ok(FetchOutcome {
        key,
        item: item
            .map(serde_json::from_str)
            .transpose()?
            .unwrap_or_default(),
        status,
        api_response: api_response.map(serde_json::from_str).transpose()?,
        error,
        timestamp,
    })
}

fn write_summary(conn: &Connection, ledger: &str, summary: &str) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO fetch_summaries (ledger, summary) VALUES (?, ?)
         ON CONFLICT (ledger) DO UPDATE SET summary = excluded.summary,
             updated_at = CURRENT_TIMESTAMP",
        params![ledger, summary],
    )?;
    Ok(())
}

/// Reads the stored summary of ledger `name`, if any.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or the summary is malformed.
pub fn read_summary(conn: &Connection, name: &str) -> Result<Option<LedgerSummary>, DbError> {
    let mut stmt = conn.prepare("SELECT summary FROM fetch_summaries WHERE ledger = ?")?;
    let mut rows = stmt.query(params![name])?;
    match rows.next()? {
        Some(row) => {
            let text: String = row.get(0)?;
            Ok(Some(serde_json::from_str(&text)?))
        }
        None => Ok(None),
    }
}

/// Reads ledger `name` in stored order, or `None` if it has never been
/// written.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a row is malformed.
pub fn read_ledger(conn: &Connection, name: &str) -> Result<Option<ResultLedger>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT key, status, item, api_response, error, fetched_at
         FROM fetch_outcomes WHERE ledger = ? ORDER BY position",
    )?;
    let mut rows = stmt.query(params![name])?;

    let mut outcomes = Vec::new();
    while let Some(row) = rows.next()? {
        let key: String = row.get(0)?;
        let status: String = row.get(1)?;
        let item: Option<String> = row.get(2)?;
        let api_response: Option<String> = row.get(3)?;
        let error: Option<String> = row.get(4)?;
        let fetched_at: String = row.get(5)?;
        outcomes.push(from_row(
            key,
            &status,
            item.as_deref(),
            api_response.as_deref(),
            error,
            &fetched_at,
        )?);
    }

    if outcomes.is_empty() && read_summary(conn, name)?.is_none() {
        return Ok(None);
    }
    Ok(Some(ResultLedger::from(outcomes)))
}

#[async_trait::async_trait]
impl LedgerStore for DuckDbLedgerStore {
    async fn load(&self) -> Result<Option<ResultLedger>, LedgerError> {
        let name = self.ledger.clone();
        self.with_conn(move |conn| read_ledger(conn, &name)).await
    }

    async fn save(
        &self,
        ledger: &ResultLedger,
        summary: &LedgerSummary,
    ) -> Result<(), LedgerError> {
        let rows = ledger
            .iter()
            .enumerate()
            .map(|(i, o)| to_row(i, o))
            .collect::<Result<Vec<_>, _>>()
            .map_err(into_ledger_error)?;
        let summary = serde_json::to_string(summary)?;
        let name = self.ledger.clone();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM fetch_outcomes WHERE ledger = ?", params![name])?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO fetch_outcomes
                     (ledger, position, key, status, item, api_response, error, fetched_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )?;
                for (position, key, status, item, api_response, error, fetched_at) in &rows {
                    stmt.execute(params![
                        name,
                        position,
                        key,
                        status,
                        item.as_deref(),
                        api_response.as_deref(),
                        error.as_deref(),
                        fetched_at,
                    ])?;
                }
            }
            write_summary(&tx, &name, &summary)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn save_summary(&self, summary: &LedgerSummary) -> Result<(), LedgerError> {
        let summary = serde_json::to_string(summary)?;
        let name = self.ledger.clone();
        self.with_conn(move |conn| write_summary(conn, &name, &summary))
            .await
    }

    fn describe(&self) -> String {
        format!("duckdb:{}#{}", self.location, self.ledger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> DuckDbLedgerStore {
        DuckDbLedgerStore::with_connection(crate::open_in_memory().unwrap(), "votes", ":memory:")
    }

    fn sample() -> ResultLedger {
        let mut ledger = ResultLedger::new();
        ledger.push(FetchOutcome::success(
            "PRC_A_21",
            json!({"BILL_ID": "PRC_A", "AGE": "21"}),
            json!([{"head": []}, {"row": [{"MONA_CD": "M1"}]}]),
        ));
        ledger.push(FetchOutcome::no_data("PRC_B_21", json!({"BILL_ID": "PRC_B"})));
        ledger.push(FetchOutcome::error("PRC_C_21", json!(null), "timeout"));
        ledger
    }

    #[tokio::test]
    async fn empty_store_loads_none() {
        assert!(store().load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load_preserves_order_and_fields() {
        let store = store();
        let ledger = sample();

        store.save(&ledger, &ledger.summary()).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();

        assert_eq!(loaded.len(), 3);
        let keys: Vec<&str> = loaded.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["PRC_A_21", "PRC_B_21", "PRC_C_21"]);
        assert_eq!(loaded.outcomes()[0], ledger.outcomes()[0]);
        assert_eq!(loaded.outcomes()[2].error.as_deref(), Some("timeout"));
        assert!(loaded.outcomes()[2].item.is_null());
    }

    #[tokio::test]
    async fn save_replaces_previous_contents() {
        let store = store();
        let ledger = sample();
        store.save(&ledger, &ledger.summary()).await.unwrap();

        let mut smaller = ResultLedger::new();
        smaller.push(FetchOutcome::no_data("ONLY", json!({})));
        store.save(&smaller, &smaller.summary()).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.outcomes()[0].key, "ONLY");
    }

    #[tokio::test]
    async fn ledgers_are_isolated_by_name() {
        let conn = crate::open_in_memory().unwrap();
        let votes = DuckDbLedgerStore::with_connection(conn, "votes", ":memory:");
        let conferences = DuckDbLedgerStore {
            ledger: "conferences".to_string(),
            ..votes.clone()
        };

        let ledger = sample();
        votes.save(&ledger, &ledger.summary()).await.unwrap();

        assert!(conferences.load().await.unwrap().is_none());
        assert_eq!(votes.load().await.unwrap().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn summary_only_write_marks_ledger_present() {
        let store = store();
        store
            .save_summary(&ResultLedger::new().summary())
            .await
            .unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assembly.duckdb");
        let ledger = sample();

        {
            let store = DuckDbLedgerStore::open(&path, "votes").unwrap();
            store.save(&ledger, &ledger.summary()).await.unwrap();
        }

        let reopened = DuckDbLedgerStore::open(&path, "votes").unwrap();
        assert_eq!(reopened.load().await.unwrap().unwrap().len(), 3);
        assert!(reopened.describe().ends_with("#votes"));
    }
}
