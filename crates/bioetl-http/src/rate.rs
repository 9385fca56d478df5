//! Per-source token bucket.
//!
//! `max_calls` tokens refill continuously over `period`. All concurrent
//! callers for a source contend on one bucket; acquisition waits
//! cooperatively instead of spinning, and no lock is held while sleeping.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Async token bucket.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    #[must_use]
    pub fn new(max_calls: u32, period: Duration) -> Self {
        let capacity = f64::from(max_calls.max(1));
        let refill_per_sec = capacity / period.as_secs_f64().max(f64::MIN_POSITIVE);
        Self {
            capacity,
            refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token, waiting until one is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                let deficit = 1.0 - state.tokens;
                Duration::from_secs_f64(deficit / self.refill_per_sec)
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Non-blocking acquire, for callers that prefer to fail fast.
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_up_to_capacity_is_free() {
        let bucket = TokenBucket::new(5, Duration::from_secs(1));
        let start = Instant::now();
        for _ in 0..5 {
            bucket.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn sixth_call_waits_for_refill() {
        let bucket = TokenBucket::new(5, Duration::from_millis(500));
        for _ in 0..5 {
            bucket.acquire().await;
        }
        let start = Instant::now();
        bucket.acquire().await;
        // One token refills in period / capacity = 100 ms.
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn try_acquire_fails_when_drained() {
        let bucket = TokenBucket::new(2, Duration::from_secs(10));
        assert!(bucket.try_acquire().await);
        assert!(bucket.try_acquire().await);
        assert!(!bucket.try_acquire().await);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_bucket() {
        use std::sync::Arc;

        let bucket = Arc::new(TokenBucket::new(4, Duration::from_millis(400)));
        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let bucket = Arc::clone(&bucket);
            handles.push(tokio::spawn(async move { bucket.acquire().await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        // 8 tokens at 4 per 400 ms: the second half must wait.
        assert!(start.elapsed() >= Duration::from_millis(300));
    }
}
