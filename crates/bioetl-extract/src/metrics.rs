//! Per-source extraction counters.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

/// Counters for one source. Incremented with relaxed atomics; read once at
/// the end of the run for the metadata document.
#[derive(Debug, Default)]
pub struct SourceMetrics {
    pub success: AtomicU64,
    pub fallback: AtomicU64,
    pub error: AtomicU64,
    pub api_calls: AtomicU64,
    pub cache_hits: AtomicU64,
}

impl SourceMetrics {
    pub fn add_success(&self, n: u64) {
        self.success.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_fallback(&self, n: u64) {
        self.fallback.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_error(&self, n: u64) {
        self.error.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_api_calls(&self, n: u64) {
        self.api_calls.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_cache_hits(&self, n: u64) {
        self.cache_hits.fetch_add(n, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            success: self.success.load(Ordering::Relaxed),
            fallback: self.fallback.load(Ordering::Relaxed),
            error: self.error.load(Ordering::Relaxed),
            api_calls: self.api_calls.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of one source's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub success: u64,
    pub fallback: u64,
    pub error: u64,
    pub api_calls: u64,
    pub cache_hits: u64,
}

/// Registry of per-source metrics, keyed by source name.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    sources: Mutex<BTreeMap<String, Arc<SourceMetrics>>>,
}

impl MetricsRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn source(&self, name: &str) -> Arc<SourceMetrics> {
        let mut sources = self.sources.lock().expect("metrics lock poisoned");
        Arc::clone(
            sources
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(SourceMetrics::default())),
        )
    }

    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, MetricsSnapshot> {
        let sources = self.sources.lock().expect("metrics lock poisoned");
        sources
            .iter()
            .map(|(name, m)| (name.clone(), m.snapshot()))
            .collect()
    }
}
