//! The wire abstraction: requests, raw responses, and the reqwest-backed
//! production transport.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use bioetl_util::canonical::sha256_hex_str;
use bioetl_util::error::TransportError;

/// Request method. `PostOverride` is an HTTP POST carrying
/// `X-HTTP-Method-Override: GET` with the filter in the body, used when a
/// single-identifier URL still exceeds the length limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    PostOverride,
}

/// One logical request. Parameters keep their declared order for URL
/// construction; the cache fingerprint sorts them, so parameter order never
/// affects cache identity.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl HttpRequest {
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            params: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn post_override(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::PostOverride,
            url: url.into(),
            params: Vec::new(),
            headers: vec![("X-HTTP-Method-Override".into(), "GET".into())],
            body: Some(body),
        }
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// The URL with the encoded query string, as it goes on the wire. The
    /// batch planner measures this against the URL length limit.
    #[must_use]
    pub fn full_url(&self) -> String {
        if self.params.is_empty() {
            return self.url.clone();
        }
        let query: Vec<String> = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect();
        format!("{}?{}", self.url, query.join("&"))
    }

    /// Stable request fingerprint: method, URL, parameters sorted by key
    /// then value, and the canonicalized body. Feeds the cache key.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut sorted = self.params.clone();
        sorted.sort();
        let body = self
            .body
            .as_ref()
            .and_then(|b| bioetl_util::canonical::to_canonical_json(b).ok())
            .unwrap_or_default();
        let method = match self.method {
            Method::Get => "GET",
            Method::PostOverride => "POST-OVERRIDE",
        };
        let mut material = String::new();
        material.push_str(method);
        material.push('\n');
        material.push_str(&self.url);
        material.push('\n');
        for (k, v) in &sorted {
            material.push_str(k);
            material.push('=');
            material.push_str(v);
            material.push('&');
        }
        material.push('\n');
        material.push_str(&body);
        sha256_hex_str(&material)
    }
}

/// Raw response before classification: status, body text, and the
/// `Retry-After` header when present.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
    pub retry_after: Option<String>,
}

/// The wire seam. Production uses [`ReqwestTransport`]; tests use the
/// scripted stub.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: &HttpRequest,
        timeout: Duration,
    ) -> Result<RawResponse, TransportError>;
}

/// Production transport over a pooled `reqwest::Client`.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// # Errors
    ///
    /// `TransportError::Network` if the client cannot be constructed.
    pub fn new(connect_timeout: Duration, user_agent: &str) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .user_agent(user_agent)
            .build()
            .map_err(|e| TransportError::Network {
                detail: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: &HttpRequest,
        timeout: Duration,
    ) -> Result<RawResponse, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::PostOverride => self.client.post(&request.url),
        };
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.timeout(timeout).send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Network {
                    detail: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Network {
                    detail: e.to_string(),
                }
            }
        })?;

        Ok(RawResponse {
            status,
            body,
            retry_after,
        })
    }
}
