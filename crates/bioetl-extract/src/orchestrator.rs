//! Bounded-parallel extraction across batches and sources.
//!
//! Primary extraction fans out batches onto a small worker pool sharing the
//! source's rate bucket; enrichment sources each run in their own task and
//! may fail individually (contributing an empty dataset and a warning)
//! without failing the run. Cancellation is observed between batches and
//! propagates; per-identifier failures become fallback records instead.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use bioetl_config::{PaginationMode, SourceConfig};
use bioetl_http::{CacheTier, FetchOutcome, SourceClient};
use bioetl_record::{Dataset, Record, Value};
use bioetl_util::error::EtlError;
use bioetl_util::CancelToken;

use crate::batch::BatchPlanner;
use crate::fallback::{fallback_record, FallbackEvidence};
use crate::flatten::{flatten_item, FlattenSpec};
use crate::metrics::MetricsRegistry;
use crate::paging::{fetch_all_cursor, fetch_all_offset};

/// One stage's extraction result.
#[derive(Debug)]
pub struct ExtractOutcome {
    pub dataset: Dataset,
    pub warnings: Vec<String>,
}

/// The extraction orchestrator: clients, metrics, and run identity.
pub struct Orchestrator {
    clients: BTreeMap<String, Arc<SourceClient>>,
    metrics: Arc<MetricsRegistry>,
    run_id: String,
    cancel: CancelToken,
}

struct BatchContext {
    client: Arc<SourceClient>,
    planner: BatchPlanner,
    spec: FlattenSpec,
    source_name: String,
    items_key: String,
    page_limit: usize,
    batch_timeout: Duration,
    run_id: String,
    cancel: CancelToken,
    metrics: Arc<MetricsRegistry>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        clients: BTreeMap<String, Arc<SourceClient>>,
        metrics: Arc<MetricsRegistry>,
        run_id: String,
        cancel: CancelToken,
    ) -> Self {
        Self {
            clients,
            metrics,
            run_id,
            cancel,
        }
    }

    #[must_use]
    pub fn client(&self, name: &str) -> Option<Arc<SourceClient>> {
        self.clients.get(name).cloned()
    }

    #[must_use]
    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        Arc::clone(&self.metrics)
    }

    /// Extract the primary dataset for the given identifiers.
    ///
    /// # Errors
    ///
    /// `EtlError::Cancelled` when cancellation is observed; per-identifier
    /// failures never error, they become fallback records.
    pub async fn extract_primary(
        &self,
        source_name: &str,
        config: &SourceConfig,
        ids: &[String],
        spec: &FlattenSpec,
        columns: Vec<String>,
        batch_workers: usize,
    ) -> Result<ExtractOutcome, EtlError> {
        let client = self
            .client(source_name)
            .ok_or_else(|| EtlError::Internal(format!("no client for source '{source_name}'")))?;

        let planner = BatchPlanner {
            base_url: config.base_url.clone(),
            resource: config.resource.clone(),
            filter_key: config.filter_key.clone(),
            max_per_batch: config.batch_size,
            max_url_len: config.max_url_len,
            page_limit: config.page_limit,
        };
        let batches = planner.plan(ids);
        info!(
            source = source_name,
            ids = ids.len(),
            batches = batches.len(),
            "planned primary extraction"
        );

        let context = Arc::new(BatchContext {
            client,
            planner,
            spec: spec.clone(),
            source_name: source_name.to_string(),
            items_key: config.items_key.clone(),
            page_limit: config.page_limit,
            batch_timeout: Duration::from_secs(config.timeout_secs),
            run_id: self.run_id.clone(),
            cancel: self.cancel.clone(),
            metrics: Arc::clone(&self.metrics),
        });

        let semaphore = Arc::new(Semaphore::new(batch_workers.max(1)));
        let mut tasks: JoinSet<Result<(Vec<Record>, Vec<String>), EtlError>> = JoinSet::new();

        for batch in batches {
            let context = Arc::clone(&context);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore never closes");
                context.cancel.check()?;
                process_batch(&context, batch).await
            });
        }

        let mut dataset = Dataset::new(columns);
        let mut warnings = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (records, batch_warnings) = joined
                .map_err(|e| EtlError::Internal(format!("batch task panicked: {e}")))??;
            dataset.extend(records);
            warnings.extend(batch_warnings);
        }

        self.cancel.check()?;
        Ok(ExtractOutcome { dataset, warnings })
    }

    /// Extract all enabled enrichment sources in parallel. Each source gets
    /// the join-key values it resolves against; a source that times out or
    /// fails contributes an empty dataset and a warning.
    ///
    /// # Errors
    ///
    /// Only `EtlError::Cancelled`.
    pub async fn extract_enrichment(
        &self,
        sources: &BTreeMap<String, SourceConfig>,
        join_values: &BTreeMap<String, Vec<String>>,
        source_workers: usize,
    ) -> Result<(BTreeMap<String, Dataset>, Vec<String>), EtlError> {
        let semaphore = Arc::new(Semaphore::new(source_workers.max(1)));
        let mut tasks: JoinSet<(String, Result<Dataset, String>)> = JoinSet::new();

        for (name, config) in sources {
            if !config.enabled {
                continue;
            }
            let Some(client) = self.client(name) else {
                continue;
            };
            let values = join_values.get(name).cloned().unwrap_or_default();
            if values.is_empty() {
                debug!(source = %name, "no join values, skipping enrichment source");
                continue;
            }

            let name = name.clone();
            let config = config.clone();
            let semaphore = Arc::clone(&semaphore);
            let metrics = Arc::clone(&self.metrics);
            let cancel = self.cancel.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore never closes");
                let deadline = Duration::from_secs(config.timeout_secs);
                let work = extract_one_enrichment(&client, &name, &config, &values, &metrics, &cancel);
                match tokio::time::timeout(deadline, work).await {
                    Ok(result) => (name, result),
                    Err(_) => (
                        name.clone(),
                        Err(format!("enrichment source '{name}' timed out, contributing no data")),
                    ),
                }
            });
        }

        let mut datasets = BTreeMap::new();
        let mut warnings = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (name, result) = joined
                .map_err(|e| EtlError::Internal(format!("enrichment task panicked: {e}")))?;
            match result {
                Ok(dataset) => {
                    datasets.insert(name, dataset);
                }
                Err(warning) => {
                    warn!("{warning}");
                    datasets.insert(name, Dataset::default());
                    warnings.push(warning);
                }
            }
        }

        self.cancel.check()?;
        Ok((datasets, warnings))
    }
}

async fn process_batch(
    context: &BatchContext,
    batch: crate::batch::Batch,
) -> Result<(Vec<Record>, Vec<String>), EtlError> {
    let metrics = context.metrics.source(&context.source_name);
    let mut warnings = Vec::new();

    let paged = tokio::time::timeout(
        context.batch_timeout,
        fetch_all_offset(
            &context.client,
            &batch.request,
            &context.items_key,
            context.page_limit,
            CacheTier::Memory,
            &metrics,
            &context.cancel,
        ),
    )
    .await;

    let mut records = Vec::new();
    let mut found: BTreeSet<String> = BTreeSet::new();

    match paged {
        Ok(Ok((items, stats))) => {
            if stats.max_attempts > 1 {
                warnings.push(format!(
                    "source '{}' needed attempt={} for a batch of {} ids",
                    context.source_name,
                    stats.max_attempts,
                    batch.ids.len()
                ));
            }
            for item in &items {
                let flattened =
                    flatten_item(item, &context.spec, &context.source_name, &context.run_id);
                if let Some(id) = item.get(context.spec.id_field.as_str()).map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                }) {
                    found.insert(id);
                }
                metrics.add_success(1);
                records.extend(flattened);
            }
        }
        Ok(Err(fetch_error)) => {
            if matches!(fetch_error.error, EtlError::Cancelled) {
                return Err(EtlError::Cancelled);
            }
            metrics.add_error(1);
            warnings.push(format!(
                "batch of {} ids failed on '{}': {}",
                batch.ids.len(),
                context.source_name,
                fetch_error.error
            ));
            let evidence = FallbackEvidence {
                error_code: classify(&fetch_error.error, fetch_error.last_status),
                http_status: fetch_error.last_status,
                attempt: fetch_error.attempts,
                retry_after_secs: fetch_error.retry_after_secs,
            };
            for id in &batch.ids {
                records.push(fallback_record(
                    id,
                    &context.source_name,
                    &context.run_id,
                    &evidence,
                ));
                metrics.add_fallback(1);
            }
            return Ok((records, warnings));
        }
        Err(_) => {
            // Per-batch soft timeout: stragglers become fallbacks.
            metrics.add_error(1);
            warnings.push(format!(
                "batch of {} ids on '{}' exceeded the soft timeout",
                batch.ids.len(),
                context.source_name
            ));
            let evidence = FallbackEvidence {
                error_code: "timeout".into(),
                http_status: None,
                attempt: 0,
                retry_after_secs: None,
            };
            for id in &batch.ids {
                records.push(fallback_record(
                    id,
                    &context.source_name,
                    &context.run_id,
                    &evidence,
                ));
                metrics.add_fallback(1);
            }
            return Ok((records, warnings));
        }
    }

    // Identifiers the filtered list response did not cover get a direct
    // lookup so a definitive 404 can be told apart from a server omission.
    for id in batch.ids.iter().filter(|id| !found.contains(*id)) {
        context.cancel.check()?;
        let single = context.planner.get_request(std::slice::from_ref(id));
        match context
            .client
            .fetch(&single, CacheTier::Memory, &context.cancel)
            .await
        {
            Ok(report) => {
                metrics.add_api_calls(u64::from(report.api_calls));
                if report.from_cache {
                    metrics.add_cache_hits(1);
                }
                match report.outcome {
                    FetchOutcome::Json(response) => {
                        let items = crate::source::items_at(&response, &context.items_key)
                            .cloned()
                            .unwrap_or_default();
                        if items.is_empty() {
                            records.push(fallback_record(
                                id,
                                &context.source_name,
                                &context.run_id,
                                &FallbackEvidence {
                                    error_code: "404".into(),
                                    http_status: Some(404),
                                    attempt: report.attempts.max(1),
                                    retry_after_secs: None,
                                },
                            ));
                            metrics.add_fallback(1);
                        } else {
                            for item in &items {
                                records.extend(flatten_item(
                                    item,
                                    &context.spec,
                                    &context.source_name,
                                    &context.run_id,
                                ));
                                metrics.add_success(1);
                            }
                        }
                    }
                    FetchOutcome::NotFound => {
                        records.push(fallback_record(
                            id,
                            &context.source_name,
                            &context.run_id,
                            &FallbackEvidence {
                                error_code: "404".into(),
                                http_status: Some(404),
                                attempt: report.attempts.max(1),
                                retry_after_secs: None,
                            },
                        ));
                        metrics.add_fallback(1);
                    }
                }
            }
            Err(fetch_error) => {
                if matches!(fetch_error.error, EtlError::Cancelled) {
                    return Err(EtlError::Cancelled);
                }
                metrics.add_api_calls(u64::from(fetch_error.api_calls));
                records.push(fallback_record(
                    id,
                    &context.source_name,
                    &context.run_id,
                    &FallbackEvidence {
                        error_code: classify(&fetch_error.error, fetch_error.last_status),
                        http_status: fetch_error.last_status,
                        attempt: fetch_error.attempts,
                        retry_after_secs: fetch_error.retry_after_secs,
                    },
                ));
                metrics.add_fallback(1);
            }
        }
    }

    Ok((records, warnings))
}

async fn extract_one_enrichment(
    client: &SourceClient,
    name: &str,
    config: &SourceConfig,
    join_values: &[String],
    metrics: &MetricsRegistry,
    cancel: &CancelToken,
) -> Result<Dataset, String> {
    let source_metrics = metrics.source(name);
    let planner = BatchPlanner {
        base_url: config.base_url.clone(),
        resource: config.resource.clone(),
        filter_key: config.filter_key.clone(),
        max_per_batch: config.batch_size,
        max_url_len: config.max_url_len,
        page_limit: config.page_limit,
    };

    let mut all_items = Vec::new();
    for batch in planner.plan(&join_values.to_vec()) {
        if cancel.is_cancelled() {
            return Err(format!("enrichment source '{name}' cancelled"));
        }
        let paged = match config.pagination {
            PaginationMode::Cursor => {
                // Enrichment lookups are long-lived cross-source mappings:
                // they go through the persistent tier.
                fetch_all_cursor(
                    client,
                    &batch.request,
                    &config.items_key,
                    CacheTier::Persistent,
                    &source_metrics,
                    cancel,
                )
                .await
            }
            _ => {
                fetch_all_offset(
                    client,
                    &batch.request,
                    &config.items_key,
                    config.page_limit,
                    CacheTier::Persistent,
                    &source_metrics,
                    cancel,
                )
                .await
            }
        };
        match paged {
            Ok((items, _stats)) => all_items.extend(items),
            Err(fetch_error) => {
                source_metrics.add_error(1);
                return Err(format!(
                    "enrichment source '{name}' failed: {}",
                    fetch_error.error
                ));
            }
        }
    }

    let mut columns: BTreeSet<String> = BTreeSet::new();
    let mut rows = Vec::new();
    for item in &all_items {
        let serde_json::Value::Object(map) = item else {
            continue;
        };
        let mut record = Record::new();
        for (key, value) in map {
            if value.is_array() || value.is_object() {
                continue;
            }
            columns.insert(key.clone());
            record.set(key.clone(), Value::from_json(value));
        }
        source_metrics.add_success(1);
        rows.push(record);
    }

    let mut dataset = Dataset::new(columns.into_iter().collect());
    dataset.extend(rows);
    Ok(dataset)
}

fn classify(error: &EtlError, last_status: Option<u16>) -> String {
    use bioetl_util::error::{ProtocolError, TransportError};
    match error {
        EtlError::Transport(t) => match t {
            TransportError::Exhausted { .. } => {
                if let Some(status) = last_status {
                    format!("exhausted_{status}")
                } else {
                    format!("exhausted_{}", t.fallback_code())
                }
            }
            other => other.fallback_code().to_string(),
        },
        EtlError::Protocol(ProtocolError::NotFound) => "404".into(),
        EtlError::Protocol(ProtocolError::BadRequest { status }) => status.to_string(),
        EtlError::Protocol(ProtocolError::ParseJson { .. }) => "parse_json".into(),
        EtlError::Protocol(ProtocolError::ParseXml { .. }) => "parse_xml".into(),
        _ => "internal".into(),
    }
}
