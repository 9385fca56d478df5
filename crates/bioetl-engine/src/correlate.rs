//! Optional correlation post-processing hook.
//!
//! Disabled by default: full numeric correlation output is not guaranteed
//! bit-exact across implementations, so it never ships silently. The
//! shipped report is deliberately integer-valued (pairwise co-occurrence
//! counts over numeric columns), which keeps the artifact deterministic
//! while preserving the hook and the file contract for the external
//! post-processor.

use bioetl_record::Dataset;
use bioetl_schema::{ColumnType, Schema};
use bioetl_util::error::EtlError;

/// Build the correlation report table from the loaded dataset.
///
/// # Errors
///
/// Serialization failure only.
pub fn correlation_report(dataset: &Dataset, schema: &Schema) -> Result<Vec<u8>, EtlError> {
    let numeric_columns: Vec<&str> = schema
        .columns
        .iter()
        .filter(|c| matches!(c.ty, ColumnType::Float | ColumnType::Int))
        .map(|c| c.name.as_str())
        .collect();

    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    writer
        .write_record(["column_a", "column_b", "paired_observations"])
        .map_err(|e| EtlError::Internal(format!("correlation header: {e}")))?;

    for (i, a) in numeric_columns.iter().enumerate() {
        for b in numeric_columns.iter().skip(i + 1) {
            let paired = dataset
                .rows()
                .iter()
                .filter(|r| !r.get(a).is_null() && !r.get(b).is_null())
                .count();
            writer
                .write_record([*a, *b, &paired.to_string()])
                .map_err(|e| EtlError::Internal(format!("correlation row: {e}")))?;
        }
    }

    writer
        .into_inner()
        .map_err(|e| EtlError::Internal(format!("correlation flush: {e}")))
}
