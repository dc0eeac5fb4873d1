#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! `DuckDB` storage for the toolkit.
//!
//! One database file under the data directory holds fetch ledgers
//! ([`ledger_store::DuckDbLedgerStore`]), flattened plenary votes
//! ([`votes`]) and raw dataset records ([`datasets`]).

pub mod datasets;
pub mod ledger_store;
pub mod paths;
pub mod votes;

use std::path::Path;

use duckdb::Connection;

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `DuckDB` error.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored payload could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

/// Opens (or creates) the database at `path` and creates any missing tables.
///
/// # Errors
///
/// Returns [`DbError`] if the connection or schema creation fails.
pub fn open(path: &Path) -> Result<Connection, DbError> {
    if let Some(parent) = path.parent() {
        paths::ensure_dir(parent)?;
    }

    let conn = Connection::open(path)?;
    create_schema(&conn)?;
    Ok(conn)
}

/// Opens an in-memory database with the full schema.
///
/// # Errors
///
/// Returns [`DbError`] if the connection or schema creation fails.
pub fn open_in_memory() -> Result<Connection, DbError> {
    let conn = Connection::open_in_memory()?;
    create_schema(&conn)?;
    Ok(conn)
}

fn create_schema(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS fetch_outcomes (
            ledger TEXT NOT NULL,
            position BIGINT NOT NULL,
            key TEXT NOT NULL,
            status TEXT NOT NULL,
            item TEXT,
            api_response TEXT,
            error TEXT,
            fetched_at TEXT NOT NULL,
            PRIMARY KEY (ledger, position)
        );

        CREATE TABLE IF NOT EXISTS fetch_summaries (
            ledger TEXT PRIMARY KEY,
            summary TEXT NOT NULL,
            updated_at TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS plenary_votes (
            bill_id TEXT NOT NULL,
            mona_cd TEXT NOT NULL,
            age INTEGER,
            member_name TEXT,
            party TEXT,
            district TEXT,
            vote_date TEXT,
            result TEXT,
            raw TEXT NOT NULL,
            created_at TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (bill_id, mona_cd)
        );

        CREATE TABLE IF NOT EXISTS dataset_records (
            dataset TEXT NOT NULL,
            position BIGINT NOT NULL,
            payload TEXT NOT NULL,
            loaded_at TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (dataset, position)
        );",
    )?;
    Ok(())
}

/// Row count of `table`. Table names are not user input.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn count_rows(conn: &Connection, table: &str) -> Result<u64, DbError> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
        row.get(0)
    })?;
    u64::try_from(count).map_err(|e| DbError::Conversion {
        message: e.to_string(),
    })
}
