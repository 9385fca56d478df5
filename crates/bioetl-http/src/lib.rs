//! Resilient HTTP layer.
//!
//! One [`SourceClient`] per logical source performs requests with the full
//! resilience stack: token-bucket rate limiting, retry with exponential
//! backoff and jitter, `Retry-After` honoring, a three-state circuit
//! breaker, a cross-call outage marker, and a two-tier release-keyed cache.
//! The wire is abstracted behind the [`Transport`] trait so the whole stack
//! runs against an in-memory stub in tests.

pub mod breaker;
pub mod cache;
pub mod client;
pub mod outage;
pub mod rate;
pub mod retry;
#[cfg(any(test, feature = "stub-transport"))]
pub mod stub;
pub mod transport;

pub use breaker::CircuitBreaker;
pub use cache::{CacheTier, HttpCache};
pub use client::{FetchError, FetchOutcome, FetchReport, SourceClient};
pub use outage::OutageTracker;
pub use rate::TokenBucket;
pub use retry::RetryPolicy;
#[cfg(any(test, feature = "stub-transport"))]
pub use stub::{StubReply, StubTransport};
pub use transport::{HttpRequest, Method, RawResponse, ReqwestTransport, Transport};
