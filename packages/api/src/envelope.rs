//! Open API response envelope.
//!
//! A populated response looks like:
//!
//! ```json
//! { "SERVICE": [
//!     { "head": [ { "list_total_count": 1234 },
//!                 { "RESULT": { "CODE": "INFO-000", "MESSAGE": "..." } } ] },
//!     { "row": [ { ... }, { ... } ] }
//! ] }
//! ```
//!
//! When nothing matches, the service key is absent and the body is just
//! `{ "RESULT": { "CODE": "INFO-200", "MESSAGE": "..." } }`.

use serde_json::Value;

use crate::ApiError;

/// Result code for "no matching data".
pub const NO_DATA_CODE: &str = "INFO-200";

/// Returns the `SERVICE` array of a response, if present.
#[must_use]
pub fn service_payload<'a>(body: &'a Value, service: &str) -> Option<&'a Value> {
    body.get(service).filter(|v| v.is_array())
}

/// Returns the record rows from a service payload.
#[must_use]
pub fn rows(payload: &Value) -> Option<&Vec<Value>> {
    payload.get(1)?.get("row")?.as_array()
}

/// Returns `list_total_count` from a service payload's head.
#[must_use]
pub fn total_count(payload: &Value) -> Option<u64> {
    payload
        .get(0)?
        .get("head")?
        .as_array()?
        .iter()
        .find_map(|entry| entry.get("list_total_count"))
        .and_then(|count| {
            count
                .as_u64()
                .or_else(|| count.as_str()?.trim().parse().ok())
        })
}

/// Returns the `(CODE, MESSAGE)` pair reported by a response, looking in
/// the service head first and then at the top level.
#[must_use]
pub fn result_code(body: &Value, service: &str) -> Option<(String, String)> {
    let from_head = service_payload(body, service)
        .and_then(|p| p.get(0)?.get("head")?.as_array())
        .and_then(|head| head.iter().find_map(|entry| entry.get("RESULT")));

    let result = from_head.or_else(|| body.get("RESULT"))?;
    let code = result.get("CODE")?.as_str()?.to_string();
    let message = result
        .get("MESSAGE")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some((code, message))
}

/// Fails if the response reports an `ERROR-*` result code.
///
/// `INFO-*` codes (including [`NO_DATA_CODE`]) are not errors.
///
/// # Errors
///
/// Returns [`ApiError::Service`] for `ERROR-*` codes.
pub fn check_result(body: &Value, service: &str) -> Result<(), ApiError> {
    match result_code(body, service) {
        Some((code, message)) if code.starts_with("ERROR") => {
            Err(ApiError::Service { code, message })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn populated() -> Value {
        json!({
            "nojepdqqaweusdfbi": [
                {"head": [
                    {"list_total_count": 2},
                    {"RESULT": {"CODE": "INFO-000", "MESSAGE": "정상 처리되었습니다."}}
                ]},
                {"row": [
                    {"BILL_ID": "PRC_A1", "MONA_CD": "M1", "RESULT_VOTE_MOD": "찬성"},
                    {"BILL_ID": "PRC_A1", "MONA_CD": "M2", "RESULT_VOTE_MOD": "반대"}
                ]}
            ]
        })
    }

    #[test]
    fn extracts_rows_and_total() {
        let body = populated();
        let payload = service_payload(&body, "nojepdqqaweusdfbi").unwrap();

        assert_eq!(rows(payload).unwrap().len(), 2);
        assert_eq!(total_count(payload), Some(2));
        assert_eq!(
            result_code(&body, "nojepdqqaweusdfbi").unwrap().0,
            "INFO-000"
        );
    }

    #[test]
    fn no_data_response_has_no_payload() {
        let body = json!({"RESULT": {"CODE": "INFO-200", "MESSAGE": "해당하는 데이터가 없습니다."}});

        assert!(service_payload(&body, "VCONFBILLCONFLIST").is_none());
        assert_eq!(
            result_code(&body, "VCONFBILLCONFLIST").unwrap().0,
            NO_DATA_CODE
        );
        assert!(check_result(&body, "VCONFBILLCONFLIST").is_ok());
    }

    #[test]
    fn error_codes_fail_the_check() {
        let body = json!({"RESULT": {"CODE": "ERROR-290", "MESSAGE": "인증키가 유효하지 않습니다."}});

        let err = check_result(&body, "ALLNAMEMBER").unwrap_err();
        assert!(matches!(err, ApiError::Service { ref code, .. } if code == "ERROR-290"));
    }

    #[test]
    fn string_total_count_is_parsed() {
        let payload = json!([{"head": [{"list_total_count": "17"}]}, {"row": []}]);
        assert_eq!(total_count(&payload), Some(17));
    }
}
