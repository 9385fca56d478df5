//! Referential integrity: required references vs resolved references.

use std::collections::BTreeSet;

use serde::Serialize;

/// A non-empty referential gap for one join key.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub key: String,
    pub required: usize,
    pub resolved: usize,
    pub missing: usize,
    /// First N unresolved references, sorted, for the quality report.
    pub sample: Vec<String>,
}

/// Compute the set difference between required and resolved references.
/// Returns `None` when everything resolved.
#[must_use]
pub fn referential_gaps(
    key: &str,
    required: &BTreeSet<String>,
    resolved: &BTreeSet<String>,
    sample_size: usize,
) -> Option<IntegrityReport> {
    let missing: Vec<&String> = required.difference(resolved).collect();
    if missing.is_empty() {
        return None;
    }
    Some(IntegrityReport {
        key: key.to_string(),
        required: required.len(),
        resolved: resolved.len(),
        missing: missing.len(),
        sample: missing
            .iter()
            .take(sample_size)
            .map(|s| (*s).clone())
            .collect(),
    })
}
