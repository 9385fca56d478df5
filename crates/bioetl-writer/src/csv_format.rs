//! CSV byte construction under the null policy.
//!
//! The format handler only affects byte construction; commit semantics live
//! in the artifact writer regardless of format. Cell rendering matches
//! canonical serialization exactly (same float precision, same instant
//! format), which is what makes re-canonicalizing a parsed CSV reproduce
//! the stored row hashes.

use bioetl_record::{Dataset, Value};
use bioetl_schema::{ColumnType, Schema};
use bioetl_util::error::EtlError;

/// A tabular byte constructor.
pub trait FormatHandler {
    fn extension(&self) -> &'static str;

    /// Render the dataset (whose column list may include the appended hash
    /// columns) into bytes.
    ///
    /// # Errors
    ///
    /// Serialization failures only; the handler performs no I/O.
    fn render(&self, dataset: &Dataset, schema: &Schema) -> Result<Vec<u8>, EtlError>;
}

/// The CSV handler.
#[derive(Debug, Default)]
pub struct CsvFormat;

impl FormatHandler for CsvFormat {
    fn extension(&self) -> &'static str {
        "csv"
    }

    fn render(&self, dataset: &Dataset, schema: &Schema) -> Result<Vec<u8>, EtlError> {
        let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());

        writer
            .write_record(dataset.columns())
            .map_err(|e| EtlError::Internal(format!("csv header: {e}")))?;

        for row in dataset.rows() {
            let cells: Vec<String> = dataset
                .columns()
                .iter()
                .map(|column| render_cell(row.get(column), column, schema))
                .collect();
            writer
                .write_record(&cells)
                .map_err(|e| EtlError::Internal(format!("csv row: {e}")))?;
        }

        writer
            .into_inner()
            .map_err(|e| EtlError::Internal(format!("csv flush: {e}")))
    }
}

/// Render one cell. Null is the empty cell for every type; for string
/// columns that empty cell *is* the declared null representation (readers
/// cannot distinguish empty string from null in CSV, which is exactly the
/// convention the null policy fixes).
fn render_cell(value: &Value, column: &str, schema: &Schema) -> String {
    match value {
        Value::Null => String::new(),
        Value::Str(s) => s.clone(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => {
            if f.is_nan() {
                String::new()
            } else {
                let precision = schema.precision_for(column) as usize;
                format!("{f:.precision$}")
            }
        }
        Value::Bool(b) => b.to_string(),
        Value::Instant(t) => t.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        Value::Json(j) => {
            serde_json_canonicalizer::to_vec(j)
                .ok()
                .and_then(|b| String::from_utf8(b).ok())
                .unwrap_or_default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bioetl_record::Record;
    use bioetl_schema::registry::activity_schema;

    fn has_column_type(schema: &Schema, name: &str, ty: ColumnType) -> bool {
        schema.column(name).is_some_and(|c| c.ty == ty)
    }

    #[test]
    fn header_matches_dataset_columns() {
        let schema = activity_schema();
        let ds = Dataset::new(schema.column_order());
        let bytes = CsvFormat.render(&ds, &schema).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let header = text.lines().next().unwrap();
        assert_eq!(header, schema.column_order().join(","));
    }

    #[test]
    fn nulls_are_empty_cells_for_every_type() {
        let schema = activity_schema();
        assert!(has_column_type(&schema, "activity_comment", ColumnType::Str));
        assert!(has_column_type(&schema, "standard_value", ColumnType::Float));

        let mut ds = Dataset::new(vec!["activity_comment".into(), "standard_value".into()]);
        ds.push(Record::new());
        let bytes = CsvFormat.render(&ds, &schema).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let row = text.lines().nth(1).unwrap();
        assert_eq!(row, ",");
    }

    #[test]
    fn floats_render_with_schema_precision() {
        let schema = activity_schema();
        let mut ds = Dataset::new(vec!["standard_value".into(), "pchembl_value".into()]);
        let mut row = Record::new();
        row.set("standard_value", Value::Float(12.5));
        row.set("pchembl_value", Value::Float(7.3));
        ds.push(row);

        let bytes = CsvFormat.render(&ds, &schema).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let row = text.lines().nth(1).unwrap();
        assert_eq!(row, "12.500000,7.3000");
    }

    #[test]
    fn instants_and_booleans_render_canonically() {
        use chrono::TimeZone;

        let schema = activity_schema();
        let mut ds = Dataset::new(vec!["conflict_doi".into(), "activity_comment".into()]);
        let mut row = Record::new();
        row.set("conflict_doi", Value::Bool(true));
        row.set(
            "activity_comment",
            Value::Instant(chrono::Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()),
        );
        ds.push(row);

        let bytes = CsvFormat.render(&ds, &schema).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.lines().nth(1).unwrap(), "true,2024-03-01T00:00:00Z");
    }

    #[test]
    fn json_audit_renders_canonical_sorted() {
        let schema = activity_schema();
        let mut ds = Dataset::new(vec!["audit_trail".into()]);
        let mut row = Record::new();
        row.set(
            "audit_trail",
            Value::Json(serde_json::json!({"z": 1, "a": 2})),
        );
        ds.push(row);

        let bytes = CsvFormat.render(&ds, &schema).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let cell = text.lines().nth(1).unwrap();
        // csv quotes the embedded commas/quotes.
        assert!(cell.contains(r#"""a"":2"#));
        assert!(cell.find("\"\"a\"\"").unwrap() < cell.find("\"\"z\"\"").unwrap());
    }

    #[test]
    fn rendering_is_deterministic() {
        let schema = activity_schema();
        let mut ds = Dataset::new(schema.column_order());
        let mut row = Record::new();
        row.set("record_id", Value::Str("1:activity:0".into()));
        row.set("standard_value", Value::Float(0.1 + 0.2));
        ds.push(row);

        let a = CsvFormat.render(&ds, &schema).unwrap();
        let b = CsvFormat.render(&ds, &schema).unwrap();
        assert_eq!(a, b);
    }
}
