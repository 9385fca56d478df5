//! Retry policy: transient classification, exponential backoff with jitter,
//! and `Retry-After` honoring with a clamp.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

/// Retry policy for one source.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Base backoff before the first retry.
    pub base: Duration,
    /// Multiplier applied per attempt.
    pub factor: f64,
    /// Backoff ceiling (before jitter).
    pub cap: Duration,
    /// Upper clamp for honored `Retry-After` waits.
    pub retry_after_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base: Duration::from_millis(500),
            factor: 2.0,
            cap: Duration::from_secs(30),
            retry_after_cap: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retrying after `attempt` failures (1-based), capped.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = self.factor.powi(attempt.saturating_sub(1) as i32);
        let millis = (self.base.as_millis() as f64 * exp).min(self.cap.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    /// Uniform jitter in `[0, 0.25 * backoff]` added to spread retries.
    #[must_use]
    pub fn jittered(&self, backoff: Duration) -> Duration {
        let max_jitter = backoff.as_millis() as u64 / 4;
        if max_jitter == 0 {
            return backoff;
        }
        let jitter = rand::thread_rng().gen_range(0..=max_jitter);
        backoff + Duration::from_millis(jitter)
    }

    /// The wait before the next attempt. A parseable `Retry-After` wins and
    /// is clamped to `[0, retry_after_cap]`; otherwise jittered backoff.
    #[must_use]
    pub fn wait_before_retry(&self, attempt: u32, retry_after: Option<&str>) -> Duration {
        if let Some(hint) = retry_after.and_then(parse_retry_after) {
            return hint.min(self.retry_after_cap);
        }
        self.jittered(self.backoff_for(attempt))
    }
}

/// Parse a `Retry-After` header: integer seconds, or an HTTP-date resolved
/// against the current instant.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let trimmed = value.trim();
    if let Ok(secs) = trimmed.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    if let Ok(date) = DateTime::parse_from_rfc2822(trimmed) {
        let delta = date.with_timezone(&Utc) - Utc::now();
        return Some(delta.to_std().unwrap_or(Duration::ZERO));
    }
    None
}

/// HTTP statuses that trigger a retry: 408, 429, and all 5xx.
#[must_use]
pub fn is_transient_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..=599).contains(&status)
}
