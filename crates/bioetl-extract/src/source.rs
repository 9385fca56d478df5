//! Source-level helpers: item extraction from list responses and the
//! release/status probe.

use serde_json::Value as Json;

use bioetl_config::SourceConfig;
use bioetl_http::{FetchOutcome, HttpRequest, SourceClient};
use bioetl_util::error::{EtlError, ProtocolError};
use bioetl_util::CancelToken;

/// Extract the item array at `items_key` from a list response. The key may
/// be a dotted path (`message.items`, `PropertyTable.Properties`).
#[must_use]
pub fn items_at<'a>(response: &'a Json, items_key: &str) -> Option<&'a Vec<Json>> {
    let mut cursor = response;
    for segment in items_key.split('.') {
        cursor = cursor.get(segment)?;
    }
    cursor.as_array()
}

/// Probe the source's status endpoint and return the release version.
///
/// Deliberately uncached: the release pins every cache key for the run, so
/// it must come from the wire exactly once per run.
///
/// # Errors
///
/// Transport/protocol errors from the probe, or `ParseJson` when the status
/// document lacks the configured release field.
pub async fn probe_release(
    client: &SourceClient,
    config: &SourceConfig,
    cancel: &CancelToken,
) -> Result<String, EtlError> {
    let url = format!(
        "{}{}",
        config.base_url.trim_end_matches('/'),
        config.status_path
    );
    let request = HttpRequest::get(url);
    let report = client
        .fetch_uncached(&request, cancel)
        .await
        .map_err(|e| e.error)?;

    match report.outcome {
        FetchOutcome::Json(doc) => {
            let release = doc
                .get(&config.release_field)
                .and_then(|v| match v {
                    Json::String(s) => Some(s.clone()),
                    Json::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .ok_or_else(|| {
                    EtlError::Protocol(ProtocolError::ParseJson {
                        body_hash: bioetl_util::canonical::sha256_hex_str(&doc.to_string()),
                    })
                })?;
            Ok(release)
        }
        FetchOutcome::NotFound => Err(EtlError::Protocol(ProtocolError::NotFound)),
    }
}
