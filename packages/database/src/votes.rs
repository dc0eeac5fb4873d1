//! Plenary vote loading.
//!
//! Flattens every successful vote-ledger outcome into `plenary_votes`, one
//! row per member per bill. Reloading the same ledger inserts nothing new.

use assembly_ledger_models::ResultLedger;
use duckdb::{Connection, params};
use serde_json::Value;

use crate::DbError;

/// Counts from one [`load_votes`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoteLoadStats {
    /// Ledger outcomes examined.
    pub processed: usize,
    /// Vote rows found in successful payloads.
    pub found: usize,
    /// Rows actually inserted (new `(bill_id, mona_cd)` pairs).
    pub inserted: usize,
    /// Rows lacking `BILL_ID` or `MONA_CD`.
    pub skipped: usize,
}

fn text(row: &Value, field: &str) -> Option<String> {
    match row.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn integer(row: &Value, field: &str) -> Option<i32> {
    match row.get(field)? {
        Value::Number(n) => n.as_i64().and_then(|n| i32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Inserts the vote rows of every successful outcome in `ledger`.
///
/// # Errors
///
/// Returns [`DbError`] if an insert fails. The whole load runs in one
/// transaction and is rolled back on error.
pub fn load_votes(conn: &mut Connection, ledger: &ResultLedger) -> Result<VoteLoadStats, DbError> {
    let mut stats = VoteLoadStats::default();
    let tx = conn.transaction()?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO plenary_votes
             (bill_id, mona_cd, age, member_name, party, district, vote_date, result, raw)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (bill_id, mona_cd) DO NOTHING",
        )?;

        for outcome in ledger.iter() {
            stats.processed += 1;
            if stats.processed % 100 == 0 {
                log::info!("Processed {}/{} records...", stats.processed, ledger.len());
            }

            if !outcome.is_success() {
                continue;
            }
            let Some(rows) = outcome
                .api_response
                .as_ref()
                .and_then(|p| p.get(1)?.get("row")?.as_array())
            else {
                continue;
            };

            for row in rows {
                stats.found += 1;
                let (Some(bill_id), Some(mona_cd)) = (text(row, "BILL_ID"), text(row, "MONA_CD"))
                else {
                    stats.skipped += 1;
                    continue;
                };

                let raw = serde_json::to_string(row)?;
                let changed = stmt.execute(params![
                    bill_id,
                    mona_cd,
                    integer(row, "AGE"),
                    text(row, "HG_NM"),
                    text(row, "POLY_NM"),
                    text(row, "ORIG_NM"),
                    text(row, "VOTE_DATE"),
                    text(row, "RESULT_VOTE_MOD"),
                    raw,
                ])?;
                stats.inserted += changed;
            }
        }
    }

    tx.commit()?;
    log::info!(
        "Vote load: processed {}, found {}, inserted {}, skipped {}",
        stats.processed,
        stats.found,
        stats.inserted,
        stats.skipped
    );
    Ok(stats)
}

/// Vote counts per result (`찬성`, `반대`, ...) for one bill.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn tally(conn: &Connection, bill_id: &str) -> Result<Vec<(String, u64)>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT COALESCE(result, ''), COUNT(*) FROM plenary_votes
         WHERE bill_id = ? GROUP BY 1 ORDER BY 1",
    )?;
    let mut rows = stmt.query(params![bill_id])?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let result: String = row.get(0)?;
        let count: i64 = row.get(1)?;
        out.push((result, u64::try_from(count).unwrap_or_default()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assembly_ledger_models::FetchOutcome;
    use serde_json::json;

    fn ledger() -> ResultLedger {
        let mut ledger = ResultLedger::new();
        ledger.push(FetchOutcome::success(
            "PRC_A_21",
            json!({"BILL_ID": "PRC_A", "AGE": "21"}),
            json!([
                {"head": [{"list_total_count": 3}]},
                {"row": [
                    {"BILL_ID": "PRC_A", "MONA_CD": "M1", "AGE": 21, "HG_NM": "김",
                     "POLY_NM": "정당", "ORIG_NM": "서울", "VOTE_DATE": "20210930",
                     "RESULT_VOTE_MOD": "찬성"},
                    {"BILL_ID": "PRC_A", "MONA_CD": "M2", "AGE": "21", "RESULT_VOTE_MOD": "반대"},
                    {"BILL_ID": "PRC_A", "RESULT_VOTE_MOD": "찬성"}
                ]}
            ]),
        ));
        ledger.push(FetchOutcome::no_data("PRC_B_21", json!({})));
        ledger.push(FetchOutcome::error("PRC_C_21", json!({}), "timeout"));
        ledger
    }

    #[test]
    fn loads_rows_from_successful_outcomes() {
        let mut conn = crate::open_in_memory().unwrap();

        let stats = load_votes(&mut conn, &ledger()).unwrap();

        assert_eq!(
            stats,
            VoteLoadStats {
                processed: 3,
                found: 3,
                inserted: 2,
                skipped: 1,
            }
        );
        assert_eq!(
            tally(&conn, "PRC_A").unwrap(),
            vec![("반대".to_string(), 1), ("찬성".to_string(), 1)]
        );
    }

    #[test]
    fn reloading_is_idempotent() {
        let mut conn = crate::open_in_memory().unwrap();

        load_votes(&mut conn, &ledger()).unwrap();
        let second = load_votes(&mut conn, &ledger()).unwrap();

        assert_eq!(second.inserted, 0);
        assert_eq!(crate::count_rows(&conn, "plenary_votes").unwrap(), 2);
    }

    #[test]
    fn member_fields_are_mapped() {
        let mut conn = crate::open_in_memory().unwrap();
        load_votes(&mut conn, &ledger()).unwrap();

        let (name, party, district, age): (String, String, String, i32) = conn
            .query_row(
                "SELECT member_name, party, district, age FROM plenary_votes WHERE mona_cd = 'M1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();

        assert_eq!(name, "김");
        assert_eq!(party, "정당");
        assert_eq!(district, "서울");
        assert_eq!(age, 21);
    }
}
