//! Fallback record manufacture.
//!
//! When a specific identifier cannot be fetched within the retry budget
//! (retry exhaustion, circuit open, persistent 5xx, or a definitive 404),
//! the orchestrator emits a placeholder record that flows through the
//! remaining stages unchanged. Every other schema field stays null; the
//! Normalize stage aligns the record to the full column set.

use bioetl_record::{Record, Value};

/// Evidence carried into a fallback record.
#[derive(Debug, Clone, Default)]
pub struct FallbackEvidence {
    /// Stable error classification code (`timeout`, `circuit_open`, `404`, …).
    pub error_code: String,
    /// Final HTTP status observed, if any.
    pub http_status: Option<u16>,
    /// Final attempt number.
    pub attempt: u32,
    /// Planned `Retry-After` wait in seconds, if the server sent one.
    pub retry_after_secs: Option<u64>,
}

/// Build the fallback record for one primary identifier.
#[must_use]
pub fn fallback_record(
    id: &str,
    source: &str,
    run_id: &str,
    evidence: &FallbackEvidence,
) -> Record {
    let mut record = Record::new();
    record.set("record_id", Value::Str(format!("{id}:activity:0")));
    record.set(
        "activity_id",
        id.parse::<i64>().map_or(Value::Null, Value::Int),
    );
    record.set("row_subtype", Value::Str("activity".into()));
    record.set("row_index", Value::Int(0));
    record.set("source_system", Value::Str(format!("{source}_fallback")));
    record.set("error_code", Value::Str(evidence.error_code.clone()));
    record.set(
        "http_status",
        evidence
            .http_status
            .map_or(Value::Null, |s| Value::Int(i64::from(s))),
    );
    record.set(
        "attempt",
        if evidence.attempt == 0 {
            Value::Null
        } else {
            Value::Int(i64::from(evidence.attempt))
        },
    );
    record.set(
        "retry_after_hint",
        evidence
            .retry_after_secs
            .map_or(Value::Null, |s| Value::Int(s as i64)),
    );
    record.set("run_id", Value::Str(run_id.to_string()));
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carries_identity_and_evidence() {
        let record = fallback_record(
            "12345",
            "chembl",
            "abcdef0123456789",
            &FallbackEvidence {
                error_code: "404".into(),
                http_status: Some(404),
                attempt: 1,
                retry_after_secs: None,
            },
        );

        assert_eq!(record.get("record_id").as_str(), Some("12345:activity:0"));
        assert_eq!(record.get("activity_id").as_int(), Some(12345));
        assert_eq!(record.get("source_system").as_str(), Some("chembl_fallback"));
        assert_eq!(record.get("error_code").as_str(), Some("404"));
        assert_eq!(record.get("http_status").as_int(), Some(404));
        assert_eq!(record.get("attempt").as_int(), Some(1));
        assert!(record.get("retry_after_hint").is_null());
        assert_eq!(record.get("run_id").as_str(), Some("abcdef0123456789"));
    }

    #[test]
    fn non_numeric_id_leaves_activity_id_null() {
        let record = fallback_record(
            "CHEMBL25",
            "chembl",
            "abcdef0123456789",
            &FallbackEvidence::default(),
        );
        assert!(record.get("activity_id").is_null());
        assert_eq!(
            record.get("record_id").as_str(),
            Some("CHEMBL25:activity:0")
        );
    }

    #[test]
    fn retry_after_hint_is_recorded() {
        let record = fallback_record(
            "1",
            "chembl",
            "abcdef0123456789",
            &FallbackEvidence {
                error_code: "rate_limited".into(),
                http_status: Some(429),
                attempt: 5,
                retry_after_secs: Some(120),
            },
        );
        assert_eq!(record.get("retry_after_hint").as_int(), Some(120));
    }

    #[test]
    fn unfetched_fields_read_as_null() {
        let record = fallback_record(
            "1",
            "chembl",
            "abcdef0123456789",
            &FallbackEvidence::default(),
        );
        assert!(record.get("molecule_chembl_id").is_null());
        assert!(record.get("standard_value").is_null());
        assert!(record.get("doi").is_null());
    }
}
