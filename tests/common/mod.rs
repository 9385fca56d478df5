//! Shared test support: stubbed transports and resolved configurations for
//! driving the full pipeline without a network.
#![allow(dead_code)] // each test binary uses a different subset

use std::sync::Arc;

use tempfile::TempDir;

use bioetl_config::{load, LoadOptions, ResolvedConfig};
use bioetl_engine::Pipeline;
use bioetl_http::{StubReply, StubTransport};
use bioetl_schema::SchemaRegistry;
use bioetl_util::CancelToken;

pub const BASE_URL: &str = "https://api.test/data";
pub const RELEASE: &str = "CHEMBL_34";

/// A stub transport with the status endpoint pre-routed.
pub fn stub_with_status() -> Arc<StubTransport> {
    let stub = StubTransport::new();
    stub.route(
        "/status.json",
        vec![StubReply::json(
            200,
            serde_json::json!({"chembl_db_version": RELEASE}),
        )],
    );
    Arc::new(stub)
}

/// Overrides pointing the pipeline at a temp workspace with the given ids.
pub fn base_overrides(tmp: &TempDir, ids: &[&str]) -> Vec<String> {
    let ids_json = serde_json::to_string(ids).unwrap();
    vec![
        format!("sources.chembl.base_url={BASE_URL}"),
        format!(
            "output.directory={}",
            tmp.path().join("out").display()
        ),
        format!(
            "cache.directory={}",
            tmp.path().join("cache").display()
        ),
        "output.date_tag=\"20240301\"".to_string(),
        format!("input.ids={ids_json}"),
        "http.backoff_base_ms=1".to_string(),
        "http.backoff_cap_ms=2".to_string(),
    ]
}

pub fn resolve(overrides: Vec<String>) -> ResolvedConfig {
    load(&LoadOptions {
        profile: None,
        overrides,
        env: Some(vec![]),
    })
    .expect("test configuration must resolve")
}

pub fn pipeline(stub: Arc<StubTransport>, overrides: Vec<String>) -> Pipeline {
    pipeline_with_cancel(stub, overrides, CancelToken::new())
}

pub fn pipeline_with_cancel(
    stub: Arc<StubTransport>,
    overrides: Vec<String>,
    cancel: CancelToken,
) -> Pipeline {
    Pipeline::new(resolve(overrides), SchemaRegistry::builtin(), stub, cancel)
}

/// A well-formed primary activity item that passes validation.
pub fn activity_item(id: u64, document: &str) -> serde_json::Value {
    serde_json::json!({
        "activity_id": id,
        "molecule_chembl_id": format!("CHEMBL{id}"),
        "target_chembl_id": "CHEMBL240",
        "assay_chembl_id": "CHEMBL615117",
        "document_chembl_id": document,
        "standard_type": "IC50",
        "standard_relation": "=",
        "standard_value": 12.5,
        "standard_units": "nM",
        "pchembl_value": 7.3
    })
}

/// A single-page list response wrapping the given items.
pub fn page(items: Vec<serde_json::Value>) -> serde_json::Value {
    serde_json::json!({
        "activities": items,
        "page_meta": {"limit": 200, "offset": 0, "next": null}
    })
}

/// Names of regular files in a directory (empty when it does not exist).
pub fn files_in(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

/// Any `.tmp_run_*` directories left under the output directory.
pub fn temp_run_dirs(dir: &std::path::Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp_run_"))
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default()
}
