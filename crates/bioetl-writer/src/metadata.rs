//! The metadata document emitted in extended mode.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use bioetl_util::error::EtlError;

/// Metadata document. The column order is always a copy of the schema's
/// column order; the schema registry remains the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataDoc {
    pub pipeline_version: String,
    pub source_system: String,
    pub release: String,
    /// UTC generation instant, ISO-8601 with `Z`.
    pub generated_at: String,
    pub row_count: usize,
    pub column_count: usize,
    pub column_order: Vec<String>,
    /// File name → SHA-256 hex, for every artifact in the set.
    pub checksums: BTreeMap<String, String>,
    /// Field → fractional digits.
    pub precision: BTreeMap<String, u8>,
    /// Per-type null representation, spelled out for downstream readers.
    pub null_policy: BTreeMap<String, String>,
    pub sort_keys: Vec<String>,
    pub commit: String,
    /// Per-source quantitative metrics.
    pub metrics: BTreeMap<String, serde_json::Value>,
    pub stage_durations_ms: BTreeMap<String, u64>,
    /// Attestation that no PII or secrets are embedded in the artifacts.
    pub pii_attestation: String,
}

impl MetadataDoc {
    /// The fixed null-policy table.
    #[must_use]
    pub fn null_policy_table() -> BTreeMap<String, String> {
        let mut policy = BTreeMap::new();
        policy.insert("string".to_string(), "empty string".to_string());
        policy.insert("integer".to_string(), "empty cell / JSON null".to_string());
        policy.insert("float".to_string(), "empty cell / JSON null".to_string());
        policy.insert("boolean".to_string(), "empty cell / JSON null".to_string());
        policy.insert("instant".to_string(), "empty cell / JSON null".to_string());
        policy.insert("json".to_string(), "empty cell / JSON null".to_string());
        policy
    }

    /// YAML bytes for committing.
    ///
    /// # Errors
    ///
    /// Serialization failure only.
    pub fn to_yaml_bytes(&self) -> Result<Vec<u8>, EtlError> {
        serde_yaml::to_string(self)
            .map(String::into_bytes)
            .map_err(|e| EtlError::Internal(format!("metadata serialization: {e}")))
    }
}
