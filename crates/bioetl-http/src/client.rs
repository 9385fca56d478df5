//! The per-source resilient client: one `fetch` with the full stack.
//!
//! Order of operations per attempt: cancellation check → outage
//! short-circuit → cache lookup → rate-bucket token → breaker admission →
//! wire → classification. No lock is held across the wire call.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{debug, warn};

use bioetl_util::canonical::sha256_hex_str;
use bioetl_util::error::{EtlError, ProtocolError, TransportError};
use bioetl_util::CancelToken;

use crate::breaker::CircuitBreaker;
use crate::cache::{CacheTier, HttpCache};
use crate::outage::OutageTracker;
use crate::rate::TokenBucket;
use crate::retry::{is_transient_status, parse_retry_after, RetryPolicy};
use crate::transport::{HttpRequest, Transport};

/// Successful fetch result.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Json(serde_json::Value),
    /// 404: a distinct result, not an error, for upstream handling.
    NotFound,
}

/// Outcome plus accounting the orchestrator records in metrics and logs.
#[derive(Debug)]
pub struct FetchReport {
    pub outcome: FetchOutcome,
    /// Final attempt number (1-based). 0 for pure cache hits.
    pub attempts: u32,
    /// Wire calls actually made by this fetch.
    pub api_calls: u32,
    pub from_cache: bool,
    pub last_status: Option<u16>,
}

/// Failed fetch with the evidence a fallback record needs.
#[derive(Debug)]
pub struct FetchError {
    pub error: EtlError,
    pub attempts: u32,
    pub api_calls: u32,
    pub last_status: Option<u16>,
    /// Planned wait from a `Retry-After` header, if the server sent one.
    pub retry_after_secs: Option<u64>,
}

impl FetchError {
    fn new(error: impl Into<EtlError>, attempts: u32, api_calls: u32) -> Self {
        Self {
            error: error.into(),
            attempts,
            api_calls,
            last_status: None,
            retry_after_secs: None,
        }
    }
}

/// Resilient HTTP client for one logical source.
pub struct SourceClient {
    name: String,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    bucket: TokenBucket,
    breaker: CircuitBreaker,
    outage: OutageTracker,
    cache: Arc<HttpCache>,
    timeout: Duration,
    release: RwLock<String>,
}

impl SourceClient {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        transport: Arc<dyn Transport>,
        policy: RetryPolicy,
        bucket: TokenBucket,
        breaker: CircuitBreaker,
        cache: Arc<HttpCache>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            policy,
            bucket,
            breaker,
            outage: OutageTracker::new(),
            cache,
            timeout,
            release: RwLock::new(String::new()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pin the release used in cache keys. Called once per run, right after
    /// the status probe.
    pub fn set_release(&self, release: &str) {
        let mut slot = self.release.write().expect("release lock poisoned");
        *slot = release.to_string();
    }

    #[must_use]
    pub fn release(&self) -> String {
        self.release.read().expect("release lock poisoned").clone()
    }

    #[must_use]
    pub fn cache(&self) -> &HttpCache {
        &self.cache
    }

    /// Perform one request with full resilience and caching.
    ///
    /// # Errors
    ///
    /// [`FetchError`] carrying the classified error plus attempt accounting.
    pub async fn fetch(
        &self,
        request: &HttpRequest,
        tier: CacheTier,
        cancel: &CancelToken,
    ) -> Result<FetchReport, FetchError> {
        let key = HttpCache::composite_key(&self.name, &self.release(), request);
        if let Some(payload) = self.cache.get(&key, tier) {
            debug!(source = %self.name, "cache hit");
            return Ok(FetchReport {
                outcome: FetchOutcome::Json(payload),
                attempts: 0,
                api_calls: 0,
                from_cache: true,
                last_status: None,
            });
        }

        let report = self.fetch_uncached(request, cancel).await?;
        if let FetchOutcome::Json(payload) = &report.outcome {
            self.cache.put(&key, payload.clone(), tier);
        }
        Ok(report)
    }

    /// Perform one request bypassing the cache (status probes, paging).
    ///
    /// # Errors
    ///
    /// [`FetchError`] carrying the classified error plus attempt accounting.
    pub async fn fetch_uncached(
        &self,
        request: &HttpRequest,
        cancel: &CancelToken,
    ) -> Result<FetchReport, FetchError> {
        let mut attempt: u32 = 0;
        let mut api_calls: u32 = 0;
        let mut last_status: Option<u16> = None;
        let mut retry_after_secs: Option<u64> = None;

        loop {
            attempt += 1;

            if let Err(e) = cancel.check() {
                return Err(carry(FetchError::new(e, attempt, api_calls), last_status, retry_after_secs));
            }

            if let Err(e) = self.outage.check() {
                return Err(carry(
                    FetchError::new(e, attempt, api_calls),
                    last_status,
                    retry_after_secs,
                ));
            }

            self.bucket.acquire().await;

            if let Err(e) = cancel.check() {
                return Err(carry(FetchError::new(e, attempt, api_calls), last_status, retry_after_secs));
            }

            if let Err(e) = self.breaker.check() {
                return Err(carry(
                    FetchError::new(e, attempt, api_calls),
                    last_status,
                    retry_after_secs,
                ));
            }

            api_calls += 1;
            debug!(
                source = %self.name,
                attempt,
                url = %request.full_url(),
                "issuing request"
            );

            let transient: TransportError = match self.transport.send(request, self.timeout).await {
                Ok(response) => {
                    last_status = Some(response.status);
                    retry_after_secs = response
                        .retry_after
                        .as_deref()
                        .and_then(parse_retry_after)
                        .map(|d| d.as_secs());

                    match response.status {
                        200..=299 => {
                            self.breaker.record_success();
                            let parsed: serde_json::Value =
                                match serde_json::from_str(&response.body) {
                                    Ok(v) => v,
                                    Err(_) => {
                                        return Err(carry(
                                            FetchError::new(
                                                classify_body(&response.body),
                                                attempt,
                                                api_calls,
                                            ),
                                            last_status,
                                            retry_after_secs,
                                        ));
                                    }
                                };
                            return Ok(FetchReport {
                                outcome: FetchOutcome::Json(parsed),
                                attempts: attempt,
                                api_calls,
                                from_cache: false,
                                last_status,
                            });
                        }
                        404 => {
                            self.breaker.record_success();
                            return Ok(FetchReport {
                                outcome: FetchOutcome::NotFound,
                                attempts: attempt,
                                api_calls,
                                from_cache: false,
                                last_status,
                            });
                        }
                        status if is_transient_status(status) => {
                            self.breaker.record_failure();
                            if status == 429 || status == 503 {
                                let backoff = retry_after_secs
                                    .map(Duration::from_secs)
                                    .unwrap_or_else(|| self.policy.backoff_for(attempt))
                                    .min(self.policy.retry_after_cap);
                                self.outage.mark(backoff, format!("HTTP {status}"));
                            }
                            status_to_transient(status, retry_after_secs)
                        }
                        status => {
                            // Non-retryable 4xx. Not a service-health signal.
                            return Err(carry(
                                FetchError::new(
                                    ProtocolError::BadRequest { status },
                                    attempt,
                                    api_calls,
                                ),
                                last_status,
                                retry_after_secs,
                            ));
                        }
                    }
                }
                Err(transport_error) => {
                    self.breaker.record_failure();
                    transport_error
                }
            };

            if attempt >= self.policy.max_attempts {
                warn!(
                    source = %self.name,
                    attempts = attempt,
                    last = %transient,
                    "retry budget exhausted"
                );
                return Err(carry(
                    FetchError::new(
                        TransportError::Exhausted {
                            attempts: attempt,
                            last: Box::new(transient),
                        },
                        attempt,
                        api_calls,
                    ),
                    last_status,
                    retry_after_secs,
                ));
            }

            let wait = self.policy.wait_before_retry(
                attempt,
                retry_after_secs.map(|s| s.to_string()).as_deref(),
            );
            debug!(
                source = %self.name,
                attempt,
                wait_ms = wait.as_millis() as u64,
                error = %transient,
                "transient failure, backing off"
            );
            tokio::time::sleep(wait).await;
        }
    }
}

/// A success status with an unparseable body. XML-looking payloads (some
/// E-utilities endpoints fall back to XML error documents) get their own
/// kind; everything else is a JSON parse failure identified by body hash.
fn classify_body(body: &str) -> ProtocolError {
    let trimmed = body.trim_start();
    if trimmed.starts_with("<?xml") || trimmed.starts_with('<') {
        ProtocolError::ParseXml {
            detail: "expected JSON, received XML-like body".into(),
        }
    } else {
        ProtocolError::ParseJson {
            body_hash: sha256_hex_str(body),
        }
    }
}

fn status_to_transient(status: u16, retry_after_secs: Option<u64>) -> TransportError {
    match status {
        408 => TransportError::Timeout,
        429 => TransportError::RateLimited { retry_after_secs },
        _ => TransportError::Network {
            detail: format!("HTTP {status}"),
        },
    }
}

fn carry(mut err: FetchError, last_status: Option<u16>, retry_after_secs: Option<u64>) -> FetchError {
    err.last_status = last_status;
    err.retry_after_secs = retry_after_secs;
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::{StubReply, StubTransport};

    fn client_with(stub: StubTransport, max_attempts: u32) -> SourceClient {
        let policy = RetryPolicy {
            max_attempts,
            base: Duration::from_millis(1),
            factor: 2.0,
            cap: Duration::from_millis(4),
            retry_after_cap: Duration::from_secs(120),
        };
        SourceClient::new(
            "chembl",
            Arc::new(stub),
            policy,
            TokenBucket::new(100, Duration::from_secs(1)),
            CircuitBreaker::new(10, Duration::from_secs(60)),
            Arc::new(HttpCache::new(
                100,
                Duration::from_secs(60),
                None,
                Duration::from_secs(60),
            )),
            Duration::from_secs(5),
        )
    }

    fn req() -> HttpRequest {
        HttpRequest::get("https://example.org/activity.json").with_param("limit", "1")
    }

    #[tokio::test]
    async fn success_parses_json_and_caches() {
        let stub = StubTransport::new();
        stub.route(
            "activity.json",
            vec![StubReply::json(200, serde_json::json!({"ok": true}))],
        );
        let client = client_with(stub, 3);
        let cancel = CancelToken::new();

        let first = client
            .fetch(&req(), CacheTier::Memory, &cancel)
            .await
            .unwrap();
        assert!(matches!(first.outcome, FetchOutcome::Json(_)));
        assert_eq!(first.attempts, 1);
        assert_eq!(first.api_calls, 1);
        assert!(!first.from_cache);

        // Second call is served from cache; the stub has no reply left.
        let second = client
            .fetch(&req(), CacheTier::Memory, &cancel)
            .await
            .unwrap();
        assert!(second.from_cache);
        assert_eq!(second.api_calls, 0);
    }

    #[tokio::test]
    async fn rate_limited_then_success_records_attempts() {
        let stub = StubTransport::new();
        stub.route(
            "activity.json",
            vec![
                StubReply::retry_after(429, "0", serde_json::json!({"error": "slow down"})),
                StubReply::json(200, serde_json::json!({"ok": true})),
            ],
        );
        let client = client_with(stub, 3);

        let report = client
            .fetch_uncached(&req(), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(report.attempts, 2);
        assert_eq!(report.api_calls, 2);
    }

    #[tokio::test]
    async fn not_found_is_a_result_not_an_error() {
        let stub = StubTransport::new();
        stub.route("activity.json", vec![StubReply::raw(404, "not here")]);
        let client = client_with(stub, 3);

        let report = client
            .fetch_uncached(&req(), &CancelToken::new())
            .await
            .unwrap();
        assert!(matches!(report.outcome, FetchOutcome::NotFound));
    }

    #[tokio::test]
    async fn persistent_5xx_exhausts_with_evidence() {
        let stub = StubTransport::new();
        stub.route(
            "activity.json",
            vec![StubReply::raw(500, "boom")], // repeats
        );
        let client = client_with(stub, 3);

        let err = client
            .fetch_uncached(&req(), &CancelToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.api_calls, 3);
        assert_eq!(err.last_status, Some(500));
        match err.error {
            EtlError::Transport(TransportError::Exhausted { attempts, .. }) => {
                assert_eq!(attempts, 3);
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn bad_request_never_retries() {
        let stub = StubTransport::new();
        stub.route("activity.json", vec![StubReply::raw(400, "bad filter")]);
        let client = client_with(stub, 5);

        let err = client
            .fetch_uncached(&req(), &CancelToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.api_calls, 1);
        assert!(matches!(
            err.error,
            EtlError::Protocol(ProtocolError::BadRequest { status: 400 })
        ));
    }

    #[tokio::test]
    async fn malformed_json_reports_body_hash() {
        let stub = StubTransport::new();
        stub.route("activity.json", vec![StubReply::raw(200, "not json at all")]);
        let client = client_with(stub, 3);

        let err = client
            .fetch_uncached(&req(), &CancelToken::new())
            .await
            .unwrap_err();
        match err.error {
            EtlError::Protocol(ProtocolError::ParseJson { body_hash }) => {
                assert_eq!(body_hash, sha256_hex_str("not json at all"));
            }
            other => panic!("expected ParseJson, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn xml_body_is_classified_separately() {
        let stub = StubTransport::new();
        stub.route(
            "activity.json",
            vec![StubReply::raw(200, "<?xml version=\"1.0\"?><error/>")],
        );
        let client = client_with(stub, 3);

        let err = client
            .fetch_uncached(&req(), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err.error,
            EtlError::Protocol(ProtocolError::ParseXml { .. })
        ));
    }

    #[tokio::test]
    async fn outage_marker_short_circuits_subsequent_calls() {
        let stub = StubTransport::new();
        stub.route(
            "activity.json",
            vec![StubReply::retry_after(
                503,
                "60",
                serde_json::json!({"error": "maintenance"}),
            )],
        );
        // One attempt only: the 503 exhausts immediately and marks the outage.
        let client = client_with(stub, 1);
        let cancel = CancelToken::new();

        let _ = client.fetch_uncached(&req(), &cancel).await.unwrap_err();

        // The next call must short-circuit without a wire call.
        let err = client.fetch_uncached(&req(), &cancel).await.unwrap_err();
        assert_eq!(err.api_calls, 0);
        assert!(matches!(
            err.error,
            EtlError::Transport(TransportError::ServiceUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn cancellation_stops_before_the_wire() {
        let stub = StubTransport::new();
        stub.route(
            "activity.json",
            vec![StubReply::json(200, serde_json::json!({}))],
        );
        let client = client_with(stub, 3);
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = client.fetch_uncached(&req(), &cancel).await.unwrap_err();
        assert_eq!(err.api_calls, 0);
        assert!(matches!(err.error, EtlError::Cancelled));
    }

    #[tokio::test]
    async fn release_change_yields_fresh_cache_entries() {
        let stub = StubTransport::new();
        stub.route(
            "activity.json",
            vec![
                StubReply::json(200, serde_json::json!({"release": "34"})),
                StubReply::json(200, serde_json::json!({"release": "35"})),
            ],
        );
        let client = client_with(stub, 3);
        let cancel = CancelToken::new();

        client.set_release("34");
        let first = client
            .fetch(&req(), CacheTier::Memory, &cancel)
            .await
            .unwrap();
        let FetchOutcome::Json(v1) = first.outcome else {
            panic!()
        };
        assert_eq!(v1["release"], "34");

        // Same request under a new release must miss the cache.
        client.set_release("35");
        let second = client
            .fetch(&req(), CacheTier::Memory, &cancel)
            .await
            .unwrap();
        assert!(!second.from_cache);
        let FetchOutcome::Json(v2) = second.outcome else {
            panic!()
        };
        assert_eq!(v2["release"], "35");
    }
}
