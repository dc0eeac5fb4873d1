//! Raw dataset records.
//!
//! Collected datasets are stored as one JSON payload per record in
//! `dataset_records`; loading a dataset replaces whatever was stored under
//! its name.

use duckdb::{Connection, params};
use serde_json::Value;

use crate::DbError;

/// Replaces the stored records of `dataset` with `records`, in order.
///
/// # Errors
///
/// Returns [`DbError`] if serialization or an insert fails; the previous
/// contents are kept in that case.
pub fn load_dataset(
    conn: &mut Connection,
    dataset: &str,
    records: &[Value],
) -> Result<usize, DbError> {
    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM dataset_records WHERE dataset = ?",
        params![dataset],
    )?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO dataset_records (dataset, position, payload) VALUES (?, ?, ?)",
        )?;
        for (position, record) in records.iter().enumerate() {
            let position = i64::try_from(position).map_err(|e| DbError::Conversion {
                message: e.to_string(),
            })?;
            stmt.execute(params![dataset, position, serde_json::to_string(record)?])?;
        }
    }

    tx.commit()?;
    log::info!("Loaded {} records into dataset {dataset}", records.len());
    Ok(records.len())
}

/// Returns the stored records of `dataset` in load order.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a payload is malformed.
pub fn read_dataset(conn: &Connection, dataset: &str) -> Result<Vec<Value>, DbError> {
    let mut stmt = conn
        .prepare("SELECT payload FROM dataset_records WHERE dataset = ? ORDER BY position")?;
    let mut rows = stmt.query(params![dataset])?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let payload: String = row.get(0)?;
        out.push(serde_json::from_str(&payload)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn load_replaces_previous_records() {
        let mut conn = crate::open_in_memory().unwrap();

        load_dataset(&mut conn, "bills", &[json!({"BILL_ID": "A"}), json!({"BILL_ID": "B"})])
            .unwrap();
        load_dataset(&mut conn, "members", &[json!({"MONA_CD": "M1"})]).unwrap();
        let count = load_dataset(&mut conn, "bills", &[json!({"BILL_ID": "C"})]).unwrap();

        assert_eq!(count, 1);
        assert_eq!(read_dataset(&conn, "bills").unwrap(), vec![json!({"BILL_ID": "C"})]);
        assert_eq!(read_dataset(&conn, "members").unwrap().len(), 1);
    }

    #[test]
    fn preserves_record_order() {
        let mut conn = crate::open_in_memory().unwrap();
        let records: Vec<Value> = (0..5).map(|i| json!({"n": i})).collect();

        load_dataset(&mut conn, "seq", &records).unwrap();

        assert_eq!(read_dataset(&conn, "seq").unwrap(), records);
    }
}
