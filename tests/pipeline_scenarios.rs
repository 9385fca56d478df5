//! End-to-end pipeline scenarios over the stubbed transport: fallback
//! manufacture, retry accounting, nested-array explosion, manifest
//! checksums, strict enrichment, and cancellation.

mod common;

use common::*;

use bioetl_engine::PipelineOptions;
use bioetl_http::StubReply;
use bioetl_util::error::{ConfigError, EtlError};
use bioetl_util::{CancelToken, ExitCode};
use tempfile::TempDir;

fn read_csv_rows(path: &std::path::Path) -> Vec<std::collections::BTreeMap<String, String>> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let headers: Vec<String> = reader
        .headers()
        .unwrap()
        .iter()
        .map(str::to_string)
        .collect();
    reader
        .records()
        .map(|record| {
            let record = record.unwrap();
            headers
                .iter()
                .cloned()
                .zip(record.iter().map(str::to_string))
                .collect()
        })
        .collect()
}

/// Three identifiers; the primary returns rows for two and a definitive
/// 404 for the third. The dataset carries three rows, one of them a
/// fallback with the observed status.
#[tokio::test]
async fn missing_identifier_becomes_a_fallback_row() {
    let tmp = TempDir::new().unwrap();
    let stub = stub_with_status();
    stub.route(
        "activity_id__in=1%2C2%2C3",
        vec![StubReply::json(
            200,
            page(vec![
                activity_item(1, "CHEMBL1137"),
                activity_item(2, "CHEMBL1137"),
            ]),
        )],
    );
    stub.route("activity_id__in=3", vec![StubReply::raw(404, "not found")]);

    let pipeline = pipeline(stub, base_overrides(&tmp, &["1", "2", "3"]));
    let summary = pipeline.run(&PipelineOptions::default()).await.unwrap();

    assert_eq!(summary.rows, 3);
    assert_eq!(summary.release, RELEASE);

    let dataset_path = tmp.path().join("out").join("output.activity_20240301.csv");
    let rows = read_csv_rows(&dataset_path);
    assert_eq!(rows.len(), 3);

    let fallback: Vec<_> = rows
        .iter()
        .filter(|r| r["source_system"] == "chembl_fallback")
        .collect();
    assert_eq!(fallback.len(), 1);
    assert_eq!(fallback[0]["error_code"], "404");
    assert_eq!(fallback[0]["http_status"], "404");
    assert_eq!(fallback[0]["record_id"], "3:activity:0");

    // Row count in the metadata document equals 3.
    let metadata_path = tmp.path().join("out").join("output.activity_20240301.meta.yaml");
    let metadata: serde_yaml::Value =
        serde_yaml::from_str(&std::fs::read_to_string(metadata_path).unwrap()).unwrap();
    assert_eq!(metadata["row_count"].as_u64(), Some(3));
}

/// A 429 with `Retry-After` once, then success: one row per identifier,
/// attempt accounting in the warnings, and two wire calls for the batch.
#[tokio::test]
async fn rate_limited_batch_retries_then_succeeds() {
    let tmp = TempDir::new().unwrap();
    let stub = stub_with_status();
    stub.route(
        "activity_id__in=",
        vec![
            StubReply::retry_after(429, "0", serde_json::json!({"error": "slow down"})),
            StubReply::json(
                200,
                page((1..=10).map(|i| activity_item(i, "CHEMBL1137")).collect()),
            ),
        ],
    );

    let ids: Vec<String> = (1..=10).map(|i| i.to_string()).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let pipeline = pipeline(std::sync::Arc::clone(&stub), base_overrides(&tmp, &id_refs));
    let summary = pipeline.run(&PipelineOptions::default()).await.unwrap();

    assert_eq!(summary.rows, 10);
    assert!(summary
        .warnings
        .iter()
        .any(|w| w.contains("attempt=2")), "warnings: {:?}", summary.warnings);
    assert_eq!(stub.call_count("activity_id__in="), 2);

    // The metadata metrics count both wire calls for the batch.
    let metadata_path = tmp.path().join("out").join("output.activity_20240301.meta.yaml");
    let metadata: serde_yaml::Value =
        serde_yaml::from_str(&std::fs::read_to_string(metadata_path).unwrap()).unwrap();
    assert_eq!(metadata["metrics"]["chembl"]["api_calls"].as_u64(), Some(2));
}

/// Two identifiers with five nested parameters each explode to long
/// format: 2 parents + 10 children, `row_index` 0..=4 per parent.
#[tokio::test]
async fn nested_arrays_explode_to_long_format() {
    let tmp = TempDir::new().unwrap();
    let stub = stub_with_status();

    let with_params = |id: u64| {
        let mut item = activity_item(id, "CHEMBL1137");
        item["activity_properties"] = serde_json::json!((0..5)
            .map(|i| serde_json::json!({
                "standard_type": format!("PARAM_{i}"),
                "standard_relation": "=",
                "standard_value": i as f64,
                "standard_units": "nM"
            }))
            .collect::<Vec<_>>());
        item
    };
    stub.route(
        "activity_id__in=",
        vec![StubReply::json(
            200,
            page(vec![with_params(1), with_params(2)]),
        )],
    );

    let pipeline = pipeline(stub, base_overrides(&tmp, &["1", "2"]));
    let summary = pipeline.run(&PipelineOptions::default()).await.unwrap();
    assert_eq!(summary.rows, 12);

    let dataset_path = tmp.path().join("out").join("output.activity_20240301.csv");
    let rows = read_csv_rows(&dataset_path);

    let parents: Vec<_> = rows.iter().filter(|r| r["row_subtype"] == "activity").collect();
    let children: Vec<_> = rows.iter().filter(|r| r["row_subtype"] == "param").collect();
    assert_eq!(parents.len(), 2);
    assert_eq!(children.len(), 10);

    for id in [1, 2] {
        let mut indexes: Vec<String> = children
            .iter()
            .filter(|r| r["record_id"].starts_with(&format!("{id}:param:")))
            .map(|r| r["row_index"].clone())
            .collect();
        indexes.sort();
        assert_eq!(indexes, vec!["0", "1", "2", "3", "4"]);
    }
}

/// Extended mode: manifest checksums match the bytes on disk and the
/// schema version equals the registry value.
#[tokio::test]
async fn manifest_checksums_match_files_on_disk() {
    use sha2::{Digest, Sha256};

    let tmp = TempDir::new().unwrap();
    let stub = stub_with_status();
    stub.route(
        "activity_id__in=",
        vec![StubReply::json(200, page(vec![activity_item(1, "CHEMBL1137")]))],
    );

    let pipeline = pipeline(stub, base_overrides(&tmp, &["1"]));
    pipeline.run(&PipelineOptions::default()).await.unwrap();

    let out = tmp.path().join("out");
    let manifest_name = files_in(&out)
        .into_iter()
        .find(|n| n.starts_with("run_manifest_"))
        .expect("manifest must exist in extended mode");
    let manifest: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out.join(&manifest_name)).unwrap()).unwrap();

    assert_eq!(manifest["schema"]["id"], "activity");
    assert_eq!(manifest["schema"]["version"], "2.1.0");

    for key in ["dataset", "quality_report"] {
        let file_name = manifest["artifacts"][key].as_str().unwrap();
        let expected = manifest["checksums"][file_name].as_str().unwrap();
        let bytes = std::fs::read(out.join(file_name)).unwrap();
        let actual = hex::encode(Sha256::digest(&bytes));
        assert_eq!(expected, actual, "checksum mismatch for {key}");
    }
}

/// Strict enrichment on: an undeclared enrichment field fails the run
/// before Load with `UnknownKey`, and nothing appears at final paths.
#[tokio::test]
async fn strict_enrichment_rejects_undeclared_fields_before_load() {
    let tmp = TempDir::new().unwrap();
    let stub = stub_with_status();
    stub.route(
        "activity_id__in=",
        vec![StubReply::json(200, page(vec![activity_item(1, "CHEMBL1137")]))],
    );
    stub.route(
        "works",
        vec![StubReply::json(
            200,
            serde_json::json!({
                "items": [{
                    "document_chembl_id": "CHEMBL1137",
                    "doi": "10.1021/jm00123",
                    "surprise": "undeclared"
                }],
                "next_cursor": null
            }),
        )],
    );

    let mut overrides = base_overrides(&tmp, &["1"]);
    overrides.push("sources.crossref.enabled=true".into());
    overrides.push("sources.crossref.base_url=https://api.test/cr".into());
    overrides.push("sources.crossref.filter_key=document_chembl_id".into());
    overrides.push("validation.strict_enrichment=true".into());

    let pipeline = pipeline(stub, overrides);
    let err = pipeline.run(&PipelineOptions::default()).await.unwrap_err();

    match &err {
        EtlError::Config(ConfigError::UnknownKey { key }) => {
            assert_eq!(key, "crossref.surprise");
        }
        other => panic!("expected UnknownKey, got {other}"),
    }
    assert_eq!(err.to_exit_code(), ExitCode::CLI_ARGS);
    assert!(files_in(&tmp.path().join("out")).is_empty());
}

/// Cancellation before the run commits: temp directory removed, no new
/// files at final paths, and the cancellation exit code.
#[tokio::test]
async fn cancellation_leaves_no_artifacts() {
    let tmp = TempDir::new().unwrap();
    let stub = stub_with_status();
    stub.route(
        "activity_id__in=",
        vec![StubReply::json(200, page(vec![activity_item(1, "CHEMBL1137")]))],
    );

    let cancel = CancelToken::new();
    cancel.cancel();
    let pipeline =
        pipeline_with_cancel(stub, base_overrides(&tmp, &["1"]), cancel);
    let err = pipeline.run(&PipelineOptions::default()).await.unwrap_err();

    assert!(matches!(err, EtlError::Cancelled));
    assert_eq!(err.to_exit_code(), ExitCode::CANCELLED);
    let out = tmp.path().join("out");
    assert!(files_in(&out).is_empty());
    assert!(temp_run_dirs(&out).is_empty());
}

/// Dry run executes Extract + Normalize + Validate and skips Load.
#[tokio::test]
async fn dry_run_commits_nothing() {
    let tmp = TempDir::new().unwrap();
    let stub = stub_with_status();
    stub.route(
        "activity_id__in=",
        vec![StubReply::json(200, page(vec![activity_item(1, "CHEMBL1137")]))],
    );

    let pipeline = pipeline(stub, base_overrides(&tmp, &["1"]));
    let summary = pipeline
        .run(&PipelineOptions {
            dry_run: true,
            golden: None,
        })
        .await
        .unwrap();

    assert_eq!(summary.rows, 1);
    assert!(summary.artifacts.is_empty());
    assert!(files_in(&tmp.path().join("out")).is_empty());
}

/// Enrichment precedence: the enrichment DOI wins over the primary's and
/// the conflict is flagged with both values in the audit trail.
#[tokio::test]
async fn enrichment_merge_applies_precedence_and_flags_conflicts() {
    let tmp = TempDir::new().unwrap();
    let stub = stub_with_status();
    let mut item = activity_item(1, "CHEMBL1137");
    item["doi"] = serde_json::json!("10.1021/primary");
    stub.route("activity_id__in=", vec![StubReply::json(200, page(vec![item]))]);
    stub.route(
        "works",
        vec![StubReply::json(
            200,
            serde_json::json!({
                "items": [{
                    "document_chembl_id": "CHEMBL1137",
                    "doi": "10.1021/enriched",
                    "journal": "J. Med. Chem.",
                    "year": 2019
                }],
                "next_cursor": null
            }),
        )],
    );

    let mut overrides = base_overrides(&tmp, &["1"]);
    overrides.push("sources.crossref.enabled=true".into());
    overrides.push("sources.crossref.base_url=https://api.test/cr".into());
    overrides.push("sources.crossref.filter_key=document_chembl_id".into());

    let pipeline = pipeline(stub, overrides);
    pipeline.run(&PipelineOptions::default()).await.unwrap();

    let rows = read_csv_rows(&tmp.path().join("out").join("output.activity_20240301.csv"));
    assert_eq!(rows[0]["doi"], "10.1021/enriched");
    assert_eq!(rows[0]["doi_source"], "crossref");
    assert_eq!(rows[0]["conflict_doi"], "true");
    assert_eq!(rows[0]["journal"], "J. Med. Chem.");
    assert_eq!(rows[0]["year"], "2019");
    assert!(rows[0]["audit_trail"].contains("10.1021/primary"));
    assert!(rows[0]["audit_trail"].contains("10.1021/enriched"));
}

/// The shipped profile resolves against the declared configuration keys.
#[test]
fn shipped_profile_resolves() {
    let profile = concat!(env!("CARGO_MANIFEST_DIR"), "/profiles/activity.yaml");
    let resolved = bioetl_config::load(&bioetl_config::LoadOptions {
        profile: Some(profile.to_string()),
        overrides: vec![],
        env: Some(vec![]),
    })
    .unwrap();

    assert_eq!(resolved.config.pipeline.table, "activity");
    assert_eq!(resolved.config.sources["chembl"].batch_size, 20);
    assert!(resolved.config.sources["crossref"].enabled);
    assert!(!resolved.config.postprocess.correlation.enabled);
}

/// Schema drift with strict checking aborts before any HTTP request.
#[tokio::test]
async fn schema_drift_aborts_before_any_wire_call() {
    let tmp = TempDir::new().unwrap();
    let stub = stub_with_status();

    let mut overrides = base_overrides(&tmp, &["1"]);
    overrides.push("pipeline.schema_version=3.0.0".into());
    let pipeline = pipeline(std::sync::Arc::clone(&stub), overrides);

    let err = pipeline.run(&PipelineOptions::default()).await.unwrap_err();
    assert_eq!(err.to_exit_code(), ExitCode::SCHEMA_DRIFT);
    assert!(stub.calls().is_empty(), "no wire call may precede the drift check");
}
