//! The quality report: per-column profile, fallback and conflict counts,
//! referential gaps, and (on validation failure) the full failure-case
//! table so humans can debug even when no artifacts commit.

use bioetl_record::{Dataset, Value};
use bioetl_schema::Schema;
use bioetl_util::error::{EtlError, FailureCase};

/// One row of the quality report table.
#[derive(Debug, Clone)]
struct QualityRow {
    section: String,
    item: String,
    metric: String,
    value: String,
    detail: String,
}

/// Accumulating quality report, rendered as CSV.
#[derive(Debug, Default)]
pub struct QualityReport {
    rows: Vec<QualityRow>,
}

impl QualityReport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Profile a dataset: row count, per-column null counts, duplicate
    /// counts for unique columns, fallback row count, conflict counts.
    pub fn profile_dataset(&mut self, dataset: &Dataset, schema: &Schema) {
        self.push(
            "dataset",
            "rows",
            "row_count",
            dataset.len().to_string(),
            "",
        );
        self.push(
            "dataset",
            "columns",
            "column_count",
            dataset.columns().len().to_string(),
            "",
        );

        for spec in &schema.columns {
            let nulls = dataset.null_count(&spec.name);
            self.push(
                "columns",
                &spec.name,
                "null_count",
                nulls.to_string(),
                "",
            );
            if spec.unique {
                let values = dataset.column_values(&spec.name);
                let mut seen = std::collections::BTreeSet::new();
                let mut dupes = 0usize;
                for value in values {
                    if !seen.insert(value.display()) {
                        dupes += 1;
                    }
                }
                self.push(
                    "columns",
                    &spec.name,
                    "duplicate_count",
                    dupes.to_string(),
                    "",
                );
            }
        }

        let fallback_rows = dataset
            .rows()
            .iter()
            .filter(|r| {
                r.get("source_system")
                    .as_str()
                    .is_some_and(|s| s.ends_with("_fallback"))
            })
            .count();
        self.push(
            "dataset",
            "fallback_rows",
            "count",
            fallback_rows.to_string(),
            "",
        );

        let conflict_columns: Vec<&str> = dataset
            .columns()
            .iter()
            .filter(|c| c.starts_with("conflict_"))
            .map(String::as_str)
            .collect();
        for column in conflict_columns {
            let conflicts = dataset
                .rows()
                .iter()
                .filter(|r| matches!(r.get(column), Value::Bool(true)))
                .count();
            self.push("conflicts", column, "count", conflicts.to_string(), "");
        }
    }

    /// Record a referential-integrity gap.
    pub fn add_integrity_gap(&mut self, key: &str, missing: usize, sample: &[String]) {
        self.push(
            "integrity",
            key,
            "unresolved_references",
            missing.to_string(),
            &sample.join(";"),
        );
    }

    /// Record the full validation failure-case table.
    pub fn add_validation_failures(&mut self, failures: &[FailureCase]) {
        for case in failures {
            self.push(
                "validation",
                &case.column,
                &case.check,
                case.count.to_string(),
                &case.values.join(";"),
            );
        }
    }

    /// Record a free-form warning line.
    pub fn add_warning(&mut self, warning: &str) {
        let index = self
            .rows
            .iter()
            .filter(|r| r.section == "warnings")
            .count();
        self.push("warnings", &format!("warning_{index}"), "message", "1".to_string(), warning);
    }

    /// Render as CSV bytes, rows in insertion order (deterministic by
    /// construction).
    ///
    /// # Errors
    ///
    /// Serialization failure only.
    pub fn render_csv(&self) -> Result<Vec<u8>, EtlError> {
        let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
        writer
            .write_record(["section", "item", "metric", "value", "detail"])
            .map_err(|e| EtlError::Internal(format!("quality header: {e}")))?;
        for row in &self.rows {
            writer
                .write_record([
                    row.section.as_str(),
                    row.item.as_str(),
                    row.metric.as_str(),
                    row.value.as_str(),
                    row.detail.as_str(),
                ])
                .map_err(|e| EtlError::Internal(format!("quality row: {e}")))?;
        }
        writer
            .into_inner()
            .map_err(|e| EtlError::Internal(format!("quality flush: {e}")))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn push(&mut self, section: &str, item: &str, metric: &str, value: String, detail: &str) {
        self.rows.push(QualityRow {
            section: section.to_string(),
            item: item.to_string(),
            metric: metric.to_string(),
            value,
            detail: detail.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bioetl_record::Record;
    use bioetl_schema::registry::activity_schema;

    fn text(report: &QualityReport) -> String {
        String::from_utf8(report.render_csv().unwrap()).unwrap()
    }

    #[test]
    fn profile_counts_rows_nulls_and_fallbacks() {
        let schema = activity_schema();
        let mut ds = Dataset::new(schema.column_order());

        let mut real = Record::new();
        real.set("record_id", Value::Str("1:activity:0".into()));
        real.set("source_system", Value::Str("chembl".into()));
        ds.push(real);

        let mut fallback = Record::new();
        fallback.set("record_id", Value::Str("2:activity:0".into()));
        fallback.set("source_system", Value::Str("chembl_fallback".into()));
        ds.push(fallback);

        let mut report = QualityReport::new();
        report.profile_dataset(&ds, &schema);
        let rendered = text(&report);

        assert!(rendered.contains("dataset,rows,row_count,2,"));
        assert!(rendered.contains("dataset,fallback_rows,count,1,"));
        assert!(rendered.contains("columns,doi,null_count,2,"));
    }

    #[test]
    fn duplicate_business_keys_are_counted() {
        let schema = activity_schema();
        let mut ds = Dataset::new(schema.column_order());
        for _ in 0..2 {
            let mut row = Record::new();
            row.set("record_id", Value::Str("same:activity:0".into()));
            ds.push(row);
        }

        let mut report = QualityReport::new();
        report.profile_dataset(&ds, &schema);
        assert!(text(&report).contains("columns,record_id,duplicate_count,1,"));
    }

    #[test]
    fn validation_failures_are_tabled() {
        let mut report = QualityReport::new();
        report.add_validation_failures(&[FailureCase {
            column: "standard_value".into(),
            check: "range".into(),
            values: vec!["-1".into(), "1e13".into()],
            count: 2,
        }]);
        let rendered = text(&report);
        assert!(rendered.contains("validation,standard_value,range,2,-1;1e13"));
    }

    #[test]
    fn integrity_gaps_and_warnings_appear() {
        let mut report = QualityReport::new();
        report.add_integrity_gap("document_chembl_id", 2, &["CHEMBL1".into(), "CHEMBL2".into()]);
        report.add_warning("source 'crossref' timed out");
        let rendered = text(&report);
        assert!(rendered.contains("integrity,document_chembl_id,unresolved_references,2,CHEMBL1;CHEMBL2"));
        assert!(rendered.contains("warnings,warning_0,message,1,source 'crossref' timed out"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let schema = activity_schema();
        let ds = Dataset::new(schema.column_order());
        let mut a = QualityReport::new();
        a.profile_dataset(&ds, &schema);
        let mut b = QualityReport::new();
        b.profile_dataset(&ds, &schema);
        assert_eq!(a.render_csv().unwrap(), b.render_csv().unwrap());
    }
}
