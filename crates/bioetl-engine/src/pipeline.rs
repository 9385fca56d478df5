//! Stage composition: Extract → Normalize → Validate → Load.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use tracing::{info, warn};

use bioetl_config::{AppConfig, ResolvedConfig, SourceConfig};
use bioetl_extract::{probe_release, FlattenSpec, MetricsRegistry, Orchestrator};
use bioetl_http::{CircuitBreaker, HttpCache, RetryPolicy, SourceClient, TokenBucket, Transport};
use bioetl_merge::{merge_enrichment, normalize_dataset, referential_gaps, MergeOptions, MergePlan};
use bioetl_record::{canonical_row::hash_row, hash_business_key, Dataset, Value};
use bioetl_schema::{
    enforce_column_order, validate, Schema, SchemaRegistry, SchemaVersion, ValidatorOptions,
};
use bioetl_util::atomic_write::write_text_atomic;
use bioetl_util::canonical::{sha256_hex, sha256_hex_str, to_canonical_json};
use bioetl_util::error::{ConfigError, EtlError, SemanticError};
use bioetl_util::CancelToken;
use bioetl_writer::{
    ArtifactNames, ArtifactWriter, CommittedFile, CsvFormat, FormatHandler, Manifest,
    ManifestSchemaRef, MetadataDoc, PlannedArtifact, QualityReport,
};

use crate::context::RunContext;
use crate::correlate::correlation_report;
use crate::golden;

/// Per-invocation options carried in from the CLI.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Execute Extract + Normalize + Validate, skip Load.
    pub dry_run: bool,
    /// Compare committed artifacts byte-exactly against this directory.
    pub golden: Option<Utf8PathBuf>,
}

/// What a completed run produced.
#[derive(Debug)]
pub struct RunSummary {
    pub run_id: String,
    pub release: String,
    pub rows: usize,
    pub artifacts: Vec<CommittedFile>,
    pub warnings: Vec<String>,
    pub stage_durations_ms: BTreeMap<String, u64>,
}

/// The pipeline runtime. Owns the resolved configuration, the schema
/// registry, and the transport; one `run` per instance invocation.
pub struct Pipeline {
    resolved: ResolvedConfig,
    registry: SchemaRegistry,
    transport: Arc<dyn Transport>,
    cancel: CancelToken,
}

impl Pipeline {
    #[must_use]
    pub fn new(
        resolved: ResolvedConfig,
        registry: SchemaRegistry,
        transport: Arc<dyn Transport>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            resolved,
            registry,
            transport,
            cancel,
        }
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Execute one run.
    ///
    /// # Errors
    ///
    /// Any stage error per the taxonomy; `EtlError::Cancelled` when the
    /// token fires. A failed run commits no artifacts.
    pub async fn run(&self, opts: &PipelineOptions) -> Result<RunSummary, EtlError> {
        let config = &self.resolved.config;
        let mut warnings: Vec<String> = Vec::new();
        let mut durations: BTreeMap<String, u64> = BTreeMap::new();

        // Schema drift is checked before any HTTP request goes out.
        let expected: SchemaVersion = config.pipeline.schema_version.parse()?;
        let schema = self
            .registry
            .get_versioned(
                &config.pipeline.schema_id,
                expected,
                config.validation.strict_schema_drift,
            )
            .map_err(EtlError::Semantic)?
            .clone();

        let primary_name = config.pipeline.primary_source.clone();
        let primary_cfg = config.sources[&primary_name].clone();

        let cache = Arc::new(self.build_cache(config));
        let clients = self.build_clients(config, &cache);
        let primary_client = clients
            .get(&primary_name)
            .cloned()
            .ok_or_else(|| EtlError::Internal(format!("no client for '{primary_name}'")))?;

        // Capture the release exactly once; it pins every cache key.
        let release = probe_release(&primary_client, &primary_cfg, &self.cancel).await?;
        for client in clients.values() {
            client.set_release(&release);
        }
        let ctx = RunContext::establish(
            release.clone(),
            self.resolved.fingerprint.clone(),
            primary_cfg.base_url.clone(),
        );
        info!(
            run_id = %ctx.run_id,
            release = %ctx.release,
            config_fingerprint = %ctx.config_fingerprint,
            "run context established"
        );
        self.persist_run_config(config, &ctx)?;

        let ids = reduce_input(config)?;
        if ids.is_empty() {
            return Err(EtlError::Config(ConfigError::InvalidValue {
                key: "input.ids".into(),
                reason: "no identifiers to extract (after limit/sample)".into(),
            }));
        }

        // ---- Extract ----------------------------------------------------
        let extract_started = Instant::now();
        let metrics = Arc::new(MetricsRegistry::new());
        let orchestrator = Orchestrator::new(
            clients.clone(),
            Arc::clone(&metrics),
            ctx.run_id.clone(),
            self.cancel.clone(),
        );

        let flatten = FlattenSpec::activity();
        let primary_out = orchestrator
            .extract_primary(
                &primary_name,
                &primary_cfg,
                &ids,
                &flatten,
                schema.column_order(),
                config.pipeline.batch_workers,
            )
            .await?;
        let mut dataset = primary_out.dataset;
        warnings.extend(primary_out.warnings);

        let enrichment_sources: BTreeMap<String, SourceConfig> = config
            .sources
            .iter()
            .filter(|(name, cfg)| **name != primary_name && cfg.enabled)
            .map(|(n, c)| (n.clone(), c.clone()))
            .collect();
        let join_values = collect_join_values(&dataset, &enrichment_sources, &schema);
        let (enrichment, enrich_warnings) = orchestrator
            .extract_enrichment(
                &enrichment_sources,
                &join_values,
                config.pipeline.source_workers,
            )
            .await?;
        warnings.extend(enrich_warnings);
        durations.insert("extract".into(), ms(extract_started));

        // ---- Normalize (canonical values + multi-source merge) ----------
        self.cancel.check()?;
        let normalize_started = Instant::now();
        normalize_dataset(&mut dataset, &schema)?;

        let plan = MergePlan {
            primary_source: primary_name.clone(),
            precedence: config.merge.precedence.clone(),
            whitelists: enrichment_sources
                .iter()
                .map(|(n, c)| (n.clone(), c.fields.clone()))
                .collect(),
            join_keys: enrichment_sources
                .iter()
                .map(|(n, c)| (n.clone(), c.join_key.clone()))
                .collect(),
        };
        let merge_outcome = merge_enrichment(
            &mut dataset,
            &enrichment,
            &schema,
            &plan,
            MergeOptions {
                strict_enrichment: config.validation.strict_enrichment,
            },
        )?;
        warnings.extend(merge_outcome.warnings.clone());
        // Merged values may arrive as raw scalars; one more pass applies
        // the schema's declared coercions uniformly. Idempotent.
        normalize_dataset(&mut dataset, &schema)?;

        let mut quality = QualityReport::new();
        for (source, cfg) in &enrichment_sources {
            let Some(required) = join_values.get(source) else {
                continue;
            };
            let required: BTreeSet<String> = required.iter().cloned().collect();
            let resolved: BTreeSet<String> = enrichment
                .get(source)
                .map(|ds| {
                    ds.rows()
                        .iter()
                        .filter_map(|r| {
                            let v = r.get(&cfg.join_key);
                            if v.is_absent() {
                                None
                            } else {
                                Some(v.display())
                            }
                        })
                        .collect()
                })
                .unwrap_or_default();
            if let Some(gap) = referential_gaps(
                &cfg.join_key,
                &required,
                &resolved,
                config.validation.integrity_sample,
            ) {
                warnings.push(format!(
                    "{} unresolved reference(s) for '{}' via '{source}'",
                    gap.missing, gap.key
                ));
                quality.add_integrity_gap(&gap.key, gap.missing, &gap.sample);
            }
        }
        durations.insert("normalize".into(), ms(normalize_started));

        // ---- Validate ---------------------------------------------------
        self.cancel.check()?;
        let validate_started = Instant::now();
        let result = validate(
            &dataset,
            &schema,
            ValidatorOptions {
                max_examples: config.validation.max_failure_examples,
            },
        );
        if let Err(SemanticError::ValidationFailed { failures }) = &result {
            // Persist the failure-case table for humans even though no
            // artifacts will commit.
            let mut failure_report = QualityReport::new();
            failure_report.add_validation_failures(failures);
            self.persist_failure_report(config, &ctx, &failure_report);
        }
        result.map_err(EtlError::Semantic)?;

        // Release pinning: a probe that reports a different release now is
        // a hard failure.
        let observed = probe_release(&primary_client, &primary_cfg, &self.cancel).await?;
        if observed != ctx.release {
            return Err(EtlError::Semantic(SemanticError::ReleaseMismatch {
                pinned: ctx.release.clone(),
                observed,
            }));
        }

        // Deterministic order, then the final column-order gate.
        dataset.sort_by_keys(&schema.effective_sort_keys());
        enforce_column_order(&dataset, &schema).map_err(EtlError::Semantic)?;
        durations.insert("validate".into(), ms(validate_started));

        quality.profile_dataset(&dataset, &schema);
        for warning in &warnings {
            quality.add_warning(warning);
        }

        if opts.dry_run {
            info!(run_id = %ctx.run_id, rows = dataset.len(), "dry run complete, skipping load");
            return Ok(RunSummary {
                run_id: ctx.run_id,
                release: ctx.release,
                rows: dataset.len(),
                artifacts: Vec::new(),
                warnings,
                stage_durations_ms: durations,
            });
        }

        // ---- Load -------------------------------------------------------
        self.cancel.check()?;
        let load_started = Instant::now();
        append_hash_columns(&mut dataset, &schema)?;

        let date_tag = config
            .output
            .date_tag
            .clone()
            .unwrap_or_else(|| ctx.date_tag());
        let names = ArtifactNames::new(&config.pipeline.table, &date_tag, &ctx.manifest_timestamp());
        let writer = ArtifactWriter::new(
            Utf8PathBuf::from(config.output.directory.clone()),
            ctx.run_id.clone(),
        );

        let dataset_bytes = CsvFormat.render(&dataset, &schema)?;
        let quality_bytes = quality.render_csv()?;

        let mut planned = vec![
            PlannedArtifact {
                key: "dataset".into(),
                name: names.dataset.clone(),
                bytes: dataset_bytes.clone(),
                required: true,
            },
            PlannedArtifact {
                key: "quality_report".into(),
                name: names.quality_report.clone(),
                bytes: quality_bytes.clone(),
                required: true,
            },
        ];

        if config.postprocess.correlation.enabled {
            planned.push(PlannedArtifact {
                key: "qc.correlation_report".into(),
                name: names.correlation_report.clone(),
                bytes: correlation_report(&dataset, &schema)?,
                required: true,
            });
        }

        if config.output.extended {
            let checksums: BTreeMap<String, String> = planned
                .iter()
                .map(|p| (p.name.clone(), sha256_hex(&p.bytes)))
                .collect();
            let metadata = MetadataDoc {
                pipeline_version: env!("CARGO_PKG_VERSION").to_string(),
                source_system: primary_name.clone(),
                release: ctx.release.clone(),
                generated_at: ctx.started_at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                row_count: dataset.len(),
                column_count: dataset.columns().len(),
                column_order: schema.column_order(),
                checksums,
                precision: schema.precision.clone(),
                null_policy: MetadataDoc::null_policy_table(),
                sort_keys: schema.effective_sort_keys(),
                commit: ctx.commit.clone(),
                metrics: metrics
                    .snapshot()
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::to_value(v).unwrap_or_default()))
                    .collect(),
                stage_durations_ms: durations.clone(),
                pii_attestation: "no PII or secrets are embedded in this artifact set".into(),
            };
            planned.push(PlannedArtifact {
                key: "metadata".into(),
                name: names.metadata.clone(),
                bytes: metadata.to_yaml_bytes()?,
                required: true,
            });
        }

        self.cancel.check()?;
        let mut committed = writer.commit_set(planned)?;

        if config.output.extended {
            let manifest = Manifest::from_committed(
                &ctx.run_id,
                &committed,
                ManifestSchemaRef {
                    id: Some(schema.id.clone()),
                    version: Some(schema.version.to_string()),
                },
            );
            let mut manifest_file =
                writer.commit_file(&names.manifest, &manifest.to_canonical_bytes()?, None)?;
            manifest_file.key = "manifest".into();
            committed.push(manifest_file);
            writer.cleanup_temp();
        }
        durations.insert("load".into(), ms(load_started));

        if let Some(golden_dir) = &opts.golden {
            let diffs = golden::compare(golden_dir, &committed);
            if !diffs.is_empty() {
                let report: Vec<String> = diffs
                    .iter()
                    .map(|d| format!("{}: {}", d.name, d.detail))
                    .collect();
                return Err(EtlError::Internal(format!(
                    "golden comparison failed:\n{}",
                    report.join("\n")
                )));
            }
            info!(golden = %golden_dir, "golden comparison passed");
        }

        info!(
            run_id = %ctx.run_id,
            rows = dataset.len(),
            artifacts = committed.len(),
            "run complete"
        );
        Ok(RunSummary {
            run_id: ctx.run_id,
            release: ctx.release,
            rows: dataset.len(),
            artifacts: committed,
            warnings,
            stage_durations_ms: durations,
        })
    }

    fn build_cache(&self, config: &AppConfig) -> HttpCache {
        let l2_dir = Utf8PathBuf::from(config.cache.directory.clone());
        HttpCache::new(
            config.cache.l1_capacity,
            Duration::from_secs(config.cache.l1_ttl_secs),
            Some(l2_dir),
            Duration::from_secs(config.cache.l2_ttl_secs),
        )
    }

    fn build_clients(
        &self,
        config: &AppConfig,
        cache: &Arc<HttpCache>,
    ) -> BTreeMap<String, Arc<SourceClient>> {
        let http = &config.http;
        let policy = RetryPolicy {
            max_attempts: http.max_attempts,
            base: Duration::from_millis(http.backoff_base_ms),
            factor: http.backoff_factor,
            cap: Duration::from_millis(http.backoff_cap_ms),
            retry_after_cap: Duration::from_secs(http.retry_after_cap_secs),
        };

        config
            .sources
            .iter()
            .filter(|(_, cfg)| cfg.enabled)
            .map(|(name, cfg)| {
                let client = SourceClient::new(
                    name.clone(),
                    Arc::clone(&self.transport),
                    policy.clone(),
                    TokenBucket::new(
                        cfg.rate_limit.max_calls,
                        Duration::from_millis(cfg.rate_limit.period_ms),
                    ),
                    CircuitBreaker::new(
                        http.breaker_failure_threshold,
                        Duration::from_secs(http.breaker_reset_secs),
                    ),
                    Arc::clone(cache),
                    Duration::from_secs(http.read_timeout_secs),
                );
                (name.clone(), Arc::new(client))
            })
            .collect()
    }

    /// Persist the resolved post-override configuration plus the captured
    /// release under the cache directory, keyed by run id. Kept out of the
    /// output directory so failed runs leave the final paths untouched.
    fn persist_run_config(&self, config: &AppConfig, ctx: &RunContext) -> Result<(), EtlError> {
        let doc = serde_json::json!({
            "context": ctx,
            "config": config,
        });
        let text = to_canonical_json(&doc)
            .map_err(|e| EtlError::Internal(format!("run_config serialization: {e}")))?;
        let path = Utf8PathBuf::from(config.cache.directory.clone())
            .join("runs")
            .join(format!("run_config_{}.json", ctx.run_id));
        write_text_atomic(&path, &text)
            .map_err(|e| EtlError::Internal(format!("run_config write: {e}")))?;
        Ok(())
    }

    fn persist_failure_report(&self, config: &AppConfig, ctx: &RunContext, report: &QualityReport) {
        let path = Utf8PathBuf::from(config.cache.directory.clone())
            .join("runs")
            .join(format!("{}_validation_failures.csv", ctx.run_id));
        match report.render_csv() {
            Ok(bytes) => {
                if let Err(e) =
                    bioetl_util::atomic_write::write_bytes_atomic(&path, &bytes)
                {
                    warn!(error = %e, "failed to persist validation failure report");
                }
            }
            Err(e) => warn!(error = %e, "failed to render validation failure report"),
        }
    }
}

/// Apply `input.limit` then the deterministic sampler. The sampler hashes
/// `{id}\n{seed}` and keeps identifiers whose 64-bit prefix falls under the
/// fraction, so membership is stable across runs and platforms.
fn reduce_input(config: &AppConfig) -> Result<Vec<String>, EtlError> {
    let mut ids = config.input.ids.clone();
    if let Some(limit) = config.input.limit {
        ids.truncate(limit);
    }
    if let Some(fraction) = config.input.sample {
        let seed = config.input.sample_seed;
        ids.retain(|id| {
            let digest = sha256_hex_str(&format!("{id}\n{seed}"));
            let prefix = u64::from_str_radix(&digest[..16], 16).unwrap_or(0);
            (prefix as f64) / (u64::MAX as f64) < fraction
        });
    }
    Ok(ids)
}

fn collect_join_values(
    dataset: &Dataset,
    sources: &BTreeMap<String, SourceConfig>,
    schema: &Schema,
) -> BTreeMap<String, Vec<String>> {
    let mut out = BTreeMap::new();
    for (name, cfg) in sources {
        let join_key = if cfg.join_key.is_empty() {
            schema.primary_key.clone()
        } else {
            cfg.join_key.clone()
        };
        let values: BTreeSet<String> = dataset
            .rows()
            .iter()
            .filter_map(|r| {
                let v = r.get(&join_key);
                if v.is_absent() {
                    None
                } else {
                    Some(v.display())
                }
            })
            .collect();
        out.insert(name.clone(), values.into_iter().collect());
    }
    out
}

/// Append `hash_business_key` and `hash_row` to every row and extend the
/// column list. The row hash covers the schema columns only, so it is
/// reproducible from the emitted CSV.
fn append_hash_columns(dataset: &mut Dataset, schema: &Schema) -> Result<(), EtlError> {
    let plan = schema.render_plan();
    let primary_key = schema.primary_key.clone();
    for row in dataset.rows_mut() {
        let business = row.get(&primary_key).display();
        let row_hash =
            hash_row(row, &plan).map_err(|e| EtlError::Internal(format!("row hashing: {e}")))?;
        row.set(
            bioetl_schema::model::HASH_BUSINESS_KEY_COLUMN,
            Value::Str(hash_business_key(&business)),
        );
        row.set(
            bioetl_schema::model::HASH_ROW_COLUMN,
            Value::Str(row_hash),
        );
    }
    dataset.set_columns(schema.output_columns());
    Ok(())
}

fn ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
