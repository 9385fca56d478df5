//! Pagination: offset-based (`page_meta.next`) and opaque-cursor modes.

use serde_json::Value as Json;

use bioetl_http::{CacheTier, FetchError, FetchOutcome, HttpRequest, SourceClient};
use bioetl_util::CancelToken;

use crate::metrics::SourceMetrics;
use crate::source::items_at;

/// Accounting from one paginated fetch.
#[derive(Debug, Default)]
pub struct PageStats {
    pub pages: u32,
    pub api_calls: u64,
    pub cache_hits: u64,
    /// Highest attempt number observed on any page.
    pub max_attempts: u32,
}

/// Fetch every page of an offset-paginated endpoint.
///
/// The server returns `page_meta {limit, offset, next}`; iteration
/// continues while `next` is non-null. Items accumulate in server order.
///
/// # Errors
///
/// The first page-level [`FetchError`]; items from earlier pages are
/// discarded by the caller (a partial list is not a dataset).
pub async fn fetch_all_offset(
    client: &SourceClient,
    base: &HttpRequest,
    items_key: &str,
    page_limit: usize,
    tier: CacheTier,
    metrics: &SourceMetrics,
    cancel: &CancelToken,
) -> Result<(Vec<Json>, PageStats), FetchError> {
    let mut items = Vec::new();
    let mut stats = PageStats::default();
    let mut offset = 0usize;

    loop {
        let request = with_offset(base, page_limit, offset);
        let report = client.fetch(&request, tier, cancel).await?;
        record(&mut stats, report.api_calls, report.from_cache, report.attempts);
        metrics.add_api_calls(u64::from(report.api_calls));
        if report.from_cache {
            metrics.add_cache_hits(1);
        }

        let FetchOutcome::Json(page) = report.outcome else {
            // 404 on a list endpoint: nothing to paginate.
            return Ok((items, stats));
        };

        if let Some(page_items) = items_at(&page, items_key) {
            items.extend(page_items.iter().cloned());
        }

        let next = page
            .get("page_meta")
            .and_then(|m| m.get("next"))
            .filter(|v| !v.is_null());
        if next.is_none() {
            return Ok((items, stats));
        }
        offset += page_limit;
    }
}

/// Fetch every page of a cursor-paginated endpoint. The cursor is opaque
/// and carried forward verbatim from `next_cursor`.
///
/// # Errors
///
/// The first page-level [`FetchError`].
pub async fn fetch_all_cursor(
    client: &SourceClient,
    base: &HttpRequest,
    items_key: &str,
    tier: CacheTier,
    metrics: &SourceMetrics,
    cancel: &CancelToken,
) -> Result<(Vec<Json>, PageStats), FetchError> {
    let mut items = Vec::new();
    let mut stats = PageStats::default();
    let mut cursor: Option<String> = None;

    loop {
        let mut request = base.clone();
        if let Some(c) = &cursor {
            request = request.with_param("cursor", c.clone());
        }
        let report = client.fetch(&request, tier, cancel).await?;
        record(&mut stats, report.api_calls, report.from_cache, report.attempts);
        metrics.add_api_calls(u64::from(report.api_calls));
        if report.from_cache {
            metrics.add_cache_hits(1);
        }

        let FetchOutcome::Json(page) = report.outcome else {
            return Ok((items, stats));
        };

        if let Some(page_items) = items_at(&page, items_key) {
            items.extend(page_items.iter().cloned());
        }

        match page.get("next_cursor").and_then(Json::as_str) {
            Some(next) if !next.is_empty() => cursor = Some(next.to_string()),
            _ => return Ok((items, stats)),
        }
    }
}

fn with_offset(base: &HttpRequest, limit: usize, offset: usize) -> HttpRequest {
    let mut request = base.clone();
    // `limit` is already on the base request; only the offset varies.
    if offset > 0 {
        request = request.with_param("offset", offset.to_string());
    }
    request
}

fn record(stats: &mut PageStats, api_calls: u32, from_cache: bool, attempts: u32) {
    stats.pages += 1;
    stats.api_calls += u64::from(api_calls);
    if from_cache {
        stats.cache_hits += 1;
    }
    stats.max_attempts = stats.max_attempts.max(attempts);
}
