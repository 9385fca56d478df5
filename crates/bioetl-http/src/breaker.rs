//! Three-state circuit breaker: closed, open, half-open.
//!
//! Closed accepts requests and counts consecutive transient failures; at
//! the threshold it opens. Open rejects immediately until the reset timeout
//! elapses, then transitions to half-open, which admits one probe per
//! minute. A successful probe closes the breaker; a failed one re-opens it
//! and restarts the cooldown.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Utc;

use bioetl_util::error::TransportError;

#[derive(Debug, Clone, Copy)]
enum State {
    Closed { consecutive_failures: u32 },
    Open { until: Instant },
    HalfOpen { last_probe: Option<Instant> },
}

/// Circuit breaker guarding one source.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    probe_interval: Duration,
    state: Mutex<State>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            probe_interval: Duration::from_secs(60),
            state: Mutex::new(State::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    #[cfg(test)]
    fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Admission check, called before going to the wire.
    ///
    /// # Errors
    ///
    /// `TransportError::CircuitOpen` while the breaker rejects requests.
    pub fn check(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        let now = Instant::now();

        match *state {
            State::Closed { .. } => Ok(()),
            State::Open { until } => {
                if now >= until {
                    *state = State::HalfOpen {
                        last_probe: Some(now),
                    };
                    Ok(())
                } else {
                    Err(circuit_open(until - now))
                }
            }
            State::HalfOpen { last_probe } => match last_probe {
                None => {
                    *state = State::HalfOpen {
                        last_probe: Some(now),
                    };
                    Ok(())
                }
                Some(at) if now.duration_since(at) >= self.probe_interval => {
                    *state = State::HalfOpen {
                        last_probe: Some(now),
                    };
                    Ok(())
                }
                Some(at) => Err(circuit_open(self.probe_interval - now.duration_since(at))),
            },
        }
    }

    /// Record a successful response (or a definitive non-transient one).
    pub fn record_success(&self) {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        *state = State::Closed {
            consecutive_failures: 0,
        };
    }

    /// Record a transient failure.
    pub fn record_failure(&self) {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        let now = Instant::now();
        *state = match *state {
            State::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures >= self.failure_threshold {
                    State::Open {
                        until: now + self.reset_timeout,
                    }
                } else {
                    State::Closed {
                        consecutive_failures: failures,
                    }
                }
            }
            State::HalfOpen { .. } | State::Open { .. } => State::Open {
                until: now + self.reset_timeout,
            },
        };
    }

    /// True while the breaker would reject a request right now.
    #[must_use]
    pub fn is_open(&self) -> bool {
        let state = self.state.lock().expect("breaker lock poisoned");
        match *state {
            State::Open { until } => Instant::now() < until,
            _ => false,
        }
    }
}

fn circuit_open(remaining: Duration) -> TransportError {
    TransportError::CircuitOpen {
        until: Utc::now()
            + chrono::Duration::from_std(remaining).unwrap_or_else(|_| chrono::Duration::zero()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.check().is_ok());
        breaker.record_failure();
        assert!(matches!(
            breaker.check(),
            Err(TransportError::CircuitOpen { .. })
        ));
        assert!(breaker.is_open());
    }

    #[test]
    fn success_resets_the_failure_count() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.check().is_ok());
    }

    #[test]
    fn transitions_to_half_open_after_reset_timeout() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        breaker.record_failure();
        assert!(breaker.check().is_err());

        std::thread::sleep(Duration::from_millis(20));
        // First call after the timeout is the admitted probe.
        assert!(breaker.check().is_ok());
    }

    #[test]
    fn half_open_admits_one_probe_per_interval() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(5))
            .with_probe_interval(Duration::from_millis(50));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(10));

        assert!(breaker.check().is_ok()); // probe admitted
        assert!(breaker.check().is_err()); // second within interval rejected
        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.check().is_ok()); // next interval's probe
    }

    #[test]
    fn failed_probe_reopens_with_fresh_cooldown() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(30));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(40));
        assert!(breaker.check().is_ok()); // half-open probe
        breaker.record_failure(); // probe failed
        assert!(matches!(
            breaker.check(),
            Err(TransportError::CircuitOpen { .. })
        ));
    }

    #[test]
    fn successful_probe_closes() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.check().is_ok());
        breaker.record_success();
        assert!(breaker.check().is_ok());
        assert!(breaker.check().is_ok());
    }
}
