//! Configuration model: every key the runtime reads, with built-in defaults
//! and post-merge range validation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use bioetl_util::error::ConfigError;

/// Resolved application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub input: InputConfig,
    pub http: HttpConfig,
    pub sources: BTreeMap<String, SourceConfig>,
    pub merge: MergeConfig,
    pub validation: ValidationConfig,
    pub output: OutputConfig,
    pub cache: CacheConfig,
    pub postprocess: PostprocessConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            input: InputConfig::default(),
            http: HttpConfig::default(),
            sources: default_sources(),
            merge: MergeConfig::default(),
            validation: ValidationConfig::default(),
            output: OutputConfig::default(),
            cache: CacheConfig::default(),
            postprocess: PostprocessConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PipelineConfig {
    /// Logical table name used in artifact file names.
    pub table: String,
    /// Schema looked up in the registry.
    pub schema_id: String,
    /// Expected schema version for the drift check.
    pub schema_version: String,
    /// Primary source name; must exist in `sources`.
    pub primary_source: String,
    /// Worker cap for per-source tasks in multi-source mode.
    pub source_workers: usize,
    /// Worker cap for per-batch tasks within one source.
    pub batch_workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            table: "activity".into(),
            schema_id: "activity".into(),
            schema_version: "2.1.0".into(),
            primary_source: "chembl".into(),
            source_workers: 4,
            batch_workers: 2,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct InputConfig {
    /// Primary identifiers to extract.
    pub ids: Vec<String>,
    /// Keep only the first N identifiers (applied before sampling).
    pub limit: Option<usize>,
    /// Keep a deterministic fraction of identifiers in `(0, 1]`.
    pub sample: Option<f64>,
    /// Seed for the deterministic sampler.
    pub sample_seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_factor: f64,
    pub backoff_cap_ms: u64,
    /// Upper clamp for honored `Retry-After` waits.
    pub retry_after_cap_secs: u64,
    pub breaker_failure_threshold: u32,
    pub breaker_reset_secs: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            read_timeout_secs: 30,
            max_attempts: 5,
            backoff_base_ms: 500,
            backoff_factor: 2.0,
            backoff_cap_ms: 30_000,
            retry_after_cap_secs: 120,
            breaker_failure_threshold: 5,
            breaker_reset_secs: 60,
            user_agent: concat!("bioetl/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

/// Class of a source, fixing its filter syntax and pagination defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Primary structured dataset API (`/{resource}.json`, `{id}__in`).
    Primary,
    /// Publication metadata, E-utilities-like (esearch/efetch).
    PublicationMetadata,
    /// Publisher metadata API (`/works`, cursor pagination).
    PublisherMetadata,
    /// Scholarly graph API.
    ScholarlyGraph,
    /// Compound properties API (comma-list path parameter).
    CompoundProperties,
    /// Protein knowledge API (query expression, streaming).
    ProteinKnowledge,
}

impl SourceKind {
    /// Hard ceiling for list-valued filter cardinality, per source class.
    #[must_use]
    pub fn max_batch(self) -> usize {
        match self {
            Self::Primary => 25,
            Self::PublicationMetadata => 200,
            Self::PublisherMetadata => 100,
            Self::ScholarlyGraph => 200,
            Self::CompoundProperties => 100,
            Self::ProteinKnowledge => 100_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationMode {
    Offset,
    Cursor,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RateLimitConfig {
    pub max_calls: u32,
    pub period_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls: 5,
            period_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub enabled: bool,
    pub base_url: String,
    /// Resource path segment for the primary filter endpoint.
    pub resource: String,
    /// Key of the item array in a list response.
    pub items_key: String,
    /// Field name used in `{filter_key}__in=` batch filters.
    pub filter_key: String,
    /// Path of the release/status probe (primary source only).
    pub status_path: String,
    /// Field of the status document carrying the release version.
    pub release_field: String,
    pub pagination: PaginationMode,
    pub batch_size: usize,
    pub max_url_len: usize,
    pub page_limit: usize,
    pub rate_limit: RateLimitConfig,
    pub timeout_secs: u64,
    pub cache_ttl_secs: u64,
    /// Whitelisted fields allowed into the merged dataset (enrichment).
    pub fields: Vec<String>,
    /// Join key for enrichment datasets.
    pub join_key: String,
    pub api_key: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Primary,
            enabled: false,
            base_url: String::new(),
            resource: String::new(),
            items_key: String::new(),
            filter_key: String::new(),
            status_path: "/status.json".into(),
            release_field: "release".into(),
            pagination: PaginationMode::Offset,
            batch_size: 25,
            max_url_len: 2000,
            page_limit: 200,
            rate_limit: RateLimitConfig::default(),
            timeout_secs: 120,
            cache_ttl_secs: 3600,
            fields: Vec::new(),
            join_key: String::new(),
            api_key: None,
        }
    }
}

fn default_sources() -> BTreeMap<String, SourceConfig> {
    let mut sources = BTreeMap::new();

    sources.insert(
        "chembl".to_string(),
        SourceConfig {
            kind: SourceKind::Primary,
            enabled: true,
            base_url: "https://www.ebi.ac.uk/chembl/api/data".into(),
            resource: "activity".into(),
            items_key: "activities".into(),
            filter_key: "activity_id".into(),
            status_path: "/status.json".into(),
            release_field: "chembl_db_version".into(),
            pagination: PaginationMode::Offset,
            batch_size: 25,
            rate_limit: RateLimitConfig {
                max_calls: 5,
                period_ms: 1000,
            },
            ..SourceConfig::default()
        },
    );

    sources.insert(
        "crossref".to_string(),
        SourceConfig {
            kind: SourceKind::PublisherMetadata,
            enabled: false,
            base_url: "https://api.crossref.org".into(),
            resource: "works".into(),
            items_key: "items".into(),
            filter_key: "doi".into(),
            pagination: PaginationMode::Cursor,
            batch_size: 100,
            rate_limit: RateLimitConfig {
                max_calls: 50,
                period_ms: 1000,
            },
            fields: vec!["doi".into(), "journal".into(), "year".into()],
            join_key: "document_chembl_id".into(),
            ..SourceConfig::default()
        },
    );

    sources.insert(
        "pubmed".to_string(),
        SourceConfig {
            kind: SourceKind::PublicationMetadata,
            enabled: false,
            base_url: "https://eutils.ncbi.nlm.nih.gov/entrez/eutils".into(),
            resource: "efetch".into(),
            items_key: "result".into(),
            filter_key: "id".into(),
            pagination: PaginationMode::Offset,
            batch_size: 200,
            rate_limit: RateLimitConfig {
                max_calls: 3,
                period_ms: 1000,
            },
            fields: vec!["doi".into(), "journal".into(), "year".into()],
            join_key: "document_chembl_id".into(),
            ..SourceConfig::default()
        },
    );

    sources.insert(
        "semanticscholar".to_string(),
        SourceConfig {
            kind: SourceKind::ScholarlyGraph,
            enabled: false,
            base_url: "https://api.semanticscholar.org/graph/v1".into(),
            resource: "paper/search".into(),
            items_key: "data".into(),
            filter_key: "ids".into(),
            pagination: PaginationMode::Cursor,
            batch_size: 200,
            rate_limit: RateLimitConfig {
                max_calls: 10,
                period_ms: 1000,
            },
            fields: vec!["doi".into(), "year".into()],
            join_key: "document_chembl_id".into(),
            ..SourceConfig::default()
        },
    );

    sources.insert(
        "pubchem".to_string(),
        SourceConfig {
            kind: SourceKind::CompoundProperties,
            enabled: false,
            base_url: "https://pubchem.ncbi.nlm.nih.gov/rest/pug".into(),
            resource: "compound/cid".into(),
            items_key: "PropertyTable".into(),
            filter_key: "cid".into(),
            pagination: PaginationMode::None,
            batch_size: 100,
            rate_limit: RateLimitConfig {
                max_calls: 5,
                period_ms: 1000,
            },
            fields: vec!["canonical_smiles".into()],
            join_key: "molecule_chembl_id".into(),
            ..SourceConfig::default()
        },
    );

    sources.insert(
        "uniprot".to_string(),
        SourceConfig {
            kind: SourceKind::ProteinKnowledge,
            enabled: false,
            base_url: "https://rest.uniprot.org".into(),
            resource: "uniprotkb/search".into(),
            items_key: "results".into(),
            filter_key: "accession".into(),
            pagination: PaginationMode::Cursor,
            batch_size: 100,
            rate_limit: RateLimitConfig {
                max_calls: 3,
                period_ms: 1000,
            },
            fields: vec![],
            join_key: "target_chembl_id".into(),
            ..SourceConfig::default()
        },
    );

    sources
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MergeConfig {
    /// Per-field precedence: ordered source names, first non-empty wins.
    pub precedence: BTreeMap<String, Vec<String>>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        let mut precedence = BTreeMap::new();
        precedence.insert(
            "doi".to_string(),
            vec!["crossref".to_string(), "chembl".to_string()],
        );
        precedence.insert("journal".to_string(), vec!["crossref".to_string()]);
        precedence.insert(
            "year".to_string(),
            vec!["crossref".to_string(), "chembl".to_string()],
        );
        Self { precedence }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ValidationConfig {
    /// Elevate major-version schema drift to a hard error.
    pub strict_schema_drift: bool,
    /// Reject undeclared fields arriving from enrichment sources.
    pub strict_enrichment: bool,
    /// Cap on example values per validation failure case.
    pub max_failure_examples: usize,
    /// Sample size recorded for referential-integrity gaps.
    pub integrity_sample: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            strict_schema_drift: true,
            strict_enrichment: false,
            max_failure_examples: 5,
            integrity_sample: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OutputConfig {
    pub directory: String,
    /// Date tag embedded in artifact names; defaults to the run's UTC date.
    pub date_tag: Option<String>,
    /// Extended mode additionally emits the metadata document and manifest.
    pub extended: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: "output".into(),
            date_tag: None,
            extended: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheConfig {
    pub directory: String,
    pub l1_capacity: usize,
    pub l1_ttl_secs: u64,
    pub l2_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: "cache".into(),
            l1_capacity: 1000,
            l1_ttl_secs: 3600,
            l2_ttl_secs: 30 * 24 * 3600,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PostprocessConfig {
    pub correlation: CorrelationConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CorrelationConfig {
    /// Off by default: correlation output is not guaranteed bit-exact
    /// across implementations, so it never ships silently.
    pub enabled: bool,
}

impl AppConfig {
    /// Range validation, run once after the last override layer.
    ///
    /// # Errors
    ///
    /// The first out-of-range or inconsistent value found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.sources.contains_key(&self.pipeline.primary_source) {
            return Err(ConfigError::InvalidValue {
                key: "pipeline.primary_source".into(),
                reason: format!("source '{}' is not configured", self.pipeline.primary_source),
            });
        }

        check_range(
            "pipeline.source_workers",
            self.pipeline.source_workers as f64,
            1.0,
            64.0,
        )?;
        check_range(
            "pipeline.batch_workers",
            self.pipeline.batch_workers as f64,
            1.0,
            64.0,
        )?;
        check_range("http.max_attempts", f64::from(self.http.max_attempts), 1.0, 20.0)?;
        if self.http.backoff_factor < 1.0 {
            return Err(ConfigError::OutOfRange {
                key: "http.backoff_factor".into(),
                value: self.http.backoff_factor.to_string(),
                allowed: ">= 1.0".into(),
            });
        }
        check_range(
            "http.retry_after_cap_secs",
            self.http.retry_after_cap_secs as f64,
            0.0,
            3600.0,
        )?;

        if let Some(sample) = self.input.sample {
            if !(sample > 0.0 && sample <= 1.0) {
                return Err(ConfigError::OutOfRange {
                    key: "input.sample".into(),
                    value: sample.to_string(),
                    allowed: "(0, 1]".into(),
                });
            }
        }

        for (name, source) in &self.sources {
            if source.batch_size == 0 || source.batch_size > source.kind.max_batch() {
                return Err(ConfigError::BatchSizeTooLarge {
                    source_name: name.clone(),
                    requested: source.batch_size,
                    maximum: source.kind.max_batch(),
                });
            }
            check_range(
                &format!("sources.{name}.page_limit"),
                source.page_limit as f64,
                1.0,
                1000.0,
            )?;
            check_range(
                &format!("sources.{name}.max_url_len"),
                source.max_url_len as f64,
                64.0,
                8192.0,
            )?;
            if source.rate_limit.max_calls == 0 || source.rate_limit.period_ms == 0 {
                return Err(ConfigError::OutOfRange {
                    key: format!("sources.{name}.rate_limit"),
                    value: format!(
                        "{}/{} ms",
                        source.rate_limit.max_calls, source.rate_limit.period_ms
                    ),
                    allowed: "positive calls and period".into(),
                });
            }
            if source.enabled && source.base_url.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: format!("sources.{name}.base_url"),
                    reason: "enabled source has no base URL".into(),
                });
            }
        }

        Ok(())
    }
}

fn check_range(key: &str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            key: key.into(),
            value: value.to_string(),
            allowed: format!("[{min}, {max}]"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn primary_source_must_exist() {
        let mut cfg = AppConfig::default();
        cfg.pipeline.primary_source = "nope".into();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn batch_size_ceiling_is_enforced() {
        let mut cfg = AppConfig::default();
        cfg.sources.get_mut("chembl").unwrap().batch_size = 500;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::BatchSizeTooLarge { .. })
        ));
    }

    #[test]
    fn sample_fraction_bounds() {
        let mut cfg = AppConfig::default();
        cfg.input.sample = Some(1.5);
        assert!(matches!(cfg.validate(), Err(ConfigError::OutOfRange { .. })));
        cfg.input.sample = Some(0.25);
        cfg.validate().unwrap();
    }

    #[test]
    fn backoff_factor_must_not_shrink() {
        let mut cfg = AppConfig::default();
        cfg.http.backoff_factor = 0.5;
        assert!(matches!(cfg.validate(), Err(ConfigError::OutOfRange { .. })));
    }

    #[test]
    fn default_sources_cover_contract_table() {
        let cfg = AppConfig::default();
        for name in [
            "chembl",
            "crossref",
            "pubmed",
            "semanticscholar",
            "pubchem",
            "uniprot",
        ] {
            assert!(cfg.sources.contains_key(name), "missing source {name}");
        }
        assert!(cfg.sources["chembl"].enabled);
        assert!(!cfg.sources["crossref"].enabled);
    }
}
