//! Artifact file naming.

/// File names for one run's artifact set.
#[derive(Debug, Clone)]
pub struct ArtifactNames {
    pub dataset: String,
    pub quality_report: String,
    pub correlation_report: String,
    pub metadata: String,
    pub manifest: String,
}

impl ArtifactNames {
    /// Build the names for a table and date tag. The manifest additionally
    /// carries the run start timestamp (`%Y%m%dT%H%M%SZ`).
    #[must_use]
    pub fn new(table: &str, date_tag: &str, manifest_timestamp: &str) -> Self {
        let stem = format!("output.{table}_{date_tag}");
        Self {
            dataset: format!("{stem}.csv"),
            quality_report: format!("{stem}_quality_report_table.csv"),
            correlation_report: format!("{stem}_data_correlation_report_table.csv"),
            metadata: format!("{stem}.meta.yaml"),
            manifest: format!("run_manifest_{manifest_timestamp}.json"),
        }
    }
}
