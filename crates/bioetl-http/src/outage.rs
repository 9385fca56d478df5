//! Cross-call service outage marker.
//!
//! Set when a 429 or 503 is observed; while set and not elapsed, callers
//! short-circuit without hitting the wire. Distinct from the circuit
//! breaker: the outage marker reflects what the service *told us* (back off
//! until T), the breaker reflects what we *observed* (consecutive failures).

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Utc;

use bioetl_util::error::TransportError;

#[derive(Debug, Clone)]
struct Outage {
    until: Instant,
    reason: String,
}

/// Shared unavailable-until marker for one source.
#[derive(Debug, Default)]
pub struct OutageTracker {
    state: Mutex<Option<Outage>>,
}

impl OutageTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the service unavailable for `duration`.
    pub fn mark(&self, duration: Duration, reason: impl Into<String>) {
        let mut state = self.state.lock().expect("outage lock poisoned");
        let until = Instant::now() + duration;
        // Keep the later deadline if one is already set.
        let keep_existing = state.as_ref().is_some_and(|o| o.until >= until);
        if !keep_existing {
            *state = Some(Outage {
                until,
                reason: reason.into(),
            });
        }
    }

    /// Short-circuit check. Clears an elapsed marker as a side effect.
    ///
    /// # Errors
    ///
    /// `TransportError::ServiceUnavailable` while the marker is active.
    pub fn check(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().expect("outage lock poisoned");
        match state.as_ref() {
            None => Ok(()),
            Some(outage) => {
                let now = Instant::now();
                if now >= outage.until {
                    *state = None;
                    Ok(())
                } else {
                    let remaining = outage.until - now;
                    Err(TransportError::ServiceUnavailable {
                        until: Utc::now()
                            + chrono::Duration::from_std(remaining)
                                .unwrap_or_else(|_| chrono::Duration::zero()),
                        reason: outage.reason.clone(),
                    })
                }
            }
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.check().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_by_default() {
        let tracker = OutageTracker::new();
        assert!(tracker.check().is_ok());
    }

    #[test]
    fn active_marker_short_circuits_with_reason() {
        let tracker = OutageTracker::new();
        tracker.mark(Duration::from_secs(60), "HTTP 429");
        match tracker.check() {
            Err(TransportError::ServiceUnavailable { reason, .. }) => {
                assert_eq!(reason, "HTTP 429");
            }
            other => panic!("expected ServiceUnavailable, got {other:?}"),
        }
    }

    #[test]
    fn elapsed_marker_clears_itself() {
        let tracker = OutageTracker::new();
        tracker.mark(Duration::from_millis(10), "HTTP 503");
        std::thread::sleep(Duration::from_millis(20));
        assert!(tracker.check().is_ok());
        assert!(!tracker.is_active());
    }

    #[test]
    fn later_deadline_wins() {
        let tracker = OutageTracker::new();
        tracker.mark(Duration::from_secs(120), "first");
        tracker.mark(Duration::from_millis(1), "second");
        // The longer outage must still be in force.
        match tracker.check() {
            Err(TransportError::ServiceUnavailable { reason, .. }) => {
                assert_eq!(reason, "first");
            }
            other => panic!("expected ServiceUnavailable, got {other:?}"),
        }
    }
}
