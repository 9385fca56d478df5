//! Scripted in-memory transport for tests.
//!
//! Routes match by substring against the full request URL (including the
//! query string). Each route holds a queue of replies; the last reply
//! repeats once the queue is down to one entry, so steady-state behavior
//! needs no counting. Every wire call is logged for assertions.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use bioetl_util::error::TransportError;

use crate::transport::{HttpRequest, RawResponse, Transport};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum StubReply {
    /// Status + JSON body.
    Json(u16, serde_json::Value),
    /// Status + raw body text.
    Raw(u16, String),
    /// Status + `Retry-After` header value + JSON body.
    RetryAfter(u16, String, serde_json::Value),
    /// Simulated network failure.
    NetworkError,
    /// Simulated timeout.
    Timeout,
}

impl StubReply {
    #[must_use]
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self::Json(status, body)
    }

    #[must_use]
    pub fn raw(status: u16, body: &str) -> Self {
        Self::Raw(status, body.to_string())
    }

    #[must_use]
    pub fn retry_after(status: u16, header: &str, body: serde_json::Value) -> Self {
        Self::RetryAfter(status, header.to_string(), body)
    }
}

struct Route {
    matcher: String,
    replies: VecDeque<StubReply>,
}

/// Scripted transport.
#[derive(Default)]
pub struct StubTransport {
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<String>>,
}

impl StubTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route. First matching route (in registration order) wins.
    pub fn route(&self, matcher: &str, replies: Vec<StubReply>) {
        self.routes.lock().expect("stub lock poisoned").push(Route {
            matcher: matcher.to_string(),
            replies: replies.into(),
        });
    }

    /// Every full URL sent through this transport, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("stub lock poisoned").clone()
    }

    /// Number of wire calls whose URL contains `matcher`.
    #[must_use]
    pub fn call_count(&self, matcher: &str) -> usize {
        self.calls
            .lock()
            .expect("stub lock poisoned")
            .iter()
            .filter(|url| url.contains(matcher))
            .count()
    }

    fn next_reply(&self, url: &str) -> Option<StubReply> {
        let mut routes = self.routes.lock().expect("stub lock poisoned");
        for route in routes.iter_mut() {
            if url.contains(&route.matcher) {
                return if route.replies.len() > 1 {
                    route.replies.pop_front()
                } else {
                    route.replies.front().cloned()
                };
            }
        }
        None
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn send(
        &self,
        request: &HttpRequest,
        _timeout: Duration,
    ) -> Result<RawResponse, TransportError> {
        let url = request.full_url();
        self.calls.lock().expect("stub lock poisoned").push(url.clone());

        match self.next_reply(&url) {
            None => Ok(RawResponse {
                status: 404,
                body: format!("no stub route for {url}"),
                retry_after: None,
            }),
            Some(StubReply::Json(status, body)) => Ok(RawResponse {
                status,
                body: body.to_string(),
                retry_after: None,
            }),
            Some(StubReply::Raw(status, body)) => Ok(RawResponse {
                status,
                body,
                retry_after: None,
            }),
            Some(StubReply::RetryAfter(status, header, body)) => Ok(RawResponse {
                status,
                body: body.to_string(),
                retry_after: Some(header),
            }),
            Some(StubReply::NetworkError) => Err(TransportError::Network {
                detail: "stubbed connection reset".into(),
            }),
            Some(StubReply::Timeout) => Err(TransportError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queue_advances_then_repeats_last() {
        let stub = StubTransport::new();
        stub.route(
            "/x",
            vec![
                StubReply::raw(500, "first"),
                StubReply::raw(200, "second"),
            ],
        );
        let req = HttpRequest::get("https://e.org/x");

        let a = stub.send(&req, Duration::from_secs(1)).await.unwrap();
        let b = stub.send(&req, Duration::from_secs(1)).await.unwrap();
        let c = stub.send(&req, Duration::from_secs(1)).await.unwrap();
        assert_eq!((a.status, b.status, c.status), (500, 200, 200));
        assert_eq!(stub.call_count("/x"), 3);
    }

    #[tokio::test]
    async fn unmatched_urls_get_404() {
        let stub = StubTransport::new();
        let req = HttpRequest::get("https://e.org/unknown");
        let resp = stub.send(&req, Duration::from_secs(1)).await.unwrap();
        assert_eq!(resp.status, 404);
    }

    #[tokio::test]
    async fn simulated_transport_errors() {
        let stub = StubTransport::new();
        stub.route("/err", vec![StubReply::NetworkError]);
        stub.route("/slow", vec![StubReply::Timeout]);

        let err = stub
            .send(&HttpRequest::get("https://e.org/err"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Network { .. }));

        let err = stub
            .send(&HttpRequest::get("https://e.org/slow"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout));
    }
}
