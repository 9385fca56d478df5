//! Two-tier, release-keyed response cache.
//!
//! L1 is in-memory, TTL-bounded and capacity-bounded. L2 is an on-disk JSON
//! key-value store used selectively for long-lived mappings (cross-source
//! identifier resolutions) with a multi-day TTL and atomic saves.
//!
//! The composite key is `sha256(source ⧺ release ⧺ request_fingerprint)`,
//! so entries written under one release are invisible to runs pinned to
//! another: release change invalidates by construction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use bioetl_util::atomic_write::write_text_atomic;
use bioetl_util::canonical::sha256_hex_str;

use crate::transport::HttpRequest;

/// Which tier a lookup may use. Persistent implies the memory tier too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Memory,
    Persistent,
}

#[derive(Debug, Clone)]
struct L1Entry {
    payload: serde_json::Value,
    stored_at: Instant,
}

#[derive(Debug, Serialize, Deserialize)]
struct L2Entry {
    stored_at: DateTime<Utc>,
    payload: serde_json::Value,
}

/// Cache statistics, readable as per-source metrics.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
}

/// Two-tier cache for one run. L1 is per-process (a fresh instance per run,
/// so a release change between runs can never serve stale memory entries);
/// L2 persists across runs under the cache directory.
#[derive(Debug)]
pub struct HttpCache {
    l1: Mutex<HashMap<String, L1Entry>>,
    l1_capacity: usize,
    l1_ttl: Duration,
    l2_dir: Option<Utf8PathBuf>,
    l2_ttl: Duration,
    stats: CacheStats,
}

impl HttpCache {
    #[must_use]
    pub fn new(
        l1_capacity: usize,
        l1_ttl: Duration,
        l2_dir: Option<Utf8PathBuf>,
        l2_ttl: Duration,
    ) -> Self {
        Self {
            l1: Mutex::new(HashMap::new()),
            l1_capacity: l1_capacity.max(1),
            l1_ttl,
            l2_dir,
            l2_ttl,
            stats: CacheStats::default(),
        }
    }

    /// Composite cache key. Deterministic and insensitive to parameter
    /// order (the request fingerprint sorts parameters).
    #[must_use]
    pub fn composite_key(source: &str, release: &str, request: &HttpRequest) -> String {
        sha256_hex_str(&format!("{source}\n{release}\n{}", request.fingerprint()))
    }

    #[must_use]
    pub fn get(&self, key: &str, tier: CacheTier) -> Option<serde_json::Value> {
        if let Some(hit) = self.get_l1(key) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Some(hit);
        }
        if tier == CacheTier::Persistent {
            if let Some(hit) = self.get_l2(key) {
                // Promote to L1 for the rest of the run.
                self.put_l1(key, hit.clone());
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Some(hit);
            }
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn put(&self, key: &str, payload: serde_json::Value, tier: CacheTier) {
        self.put_l1(key, payload.clone());
        if tier == CacheTier::Persistent {
            self.put_l2(key, &payload);
        }
    }

    #[must_use]
    pub fn hits(&self) -> u64 {
        self.stats.hits.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn misses(&self) -> u64 {
        self.stats.misses.load(Ordering::Relaxed)
    }

    fn get_l1(&self, key: &str) -> Option<serde_json::Value> {
        let mut l1 = self.l1.lock().expect("cache lock poisoned");
        match l1.get(key) {
            Some(entry) if entry.stored_at.elapsed() <= self.l1_ttl => Some(entry.payload.clone()),
            Some(_) => {
                l1.remove(key);
                None
            }
            None => None,
        }
    }

    fn put_l1(&self, key: &str, payload: serde_json::Value) {
        let mut l1 = self.l1.lock().expect("cache lock poisoned");
        if l1.len() >= self.l1_capacity && !l1.contains_key(key) {
            // Evict the oldest entry. Linear scan is fine at the default
            // capacity of 1000.
            if let Some(oldest) = l1
                .iter()
                .min_by_key(|(_, e)| e.stored_at)
                .map(|(k, _)| k.clone())
            {
                l1.remove(&oldest);
            }
        }
        l1.insert(
            key.to_string(),
            L1Entry {
                payload,
                stored_at: Instant::now(),
            },
        );
    }

    fn l2_path(&self, key: &str) -> Option<Utf8PathBuf> {
        self.l2_dir.as_ref().map(|dir| dir.join(format!("{key}.json")))
    }

    fn get_l2(&self, key: &str) -> Option<serde_json::Value> {
        let path = self.l2_path(key)?;
        let text = std::fs::read_to_string(&path).ok()?;
        let entry: L2Entry = match serde_json::from_str(&text) {
            Ok(entry) => entry,
            Err(_) => {
                // Corrupted entry: drop it.
                let _ = std::fs::remove_file(&path);
                return None;
            }
        };
        let age = Utc::now() - entry.stored_at;
        if age.to_std().unwrap_or(Duration::MAX) > self.l2_ttl {
            debug!(key, "persistent cache entry expired");
            let _ = std::fs::remove_file(&path);
            return None;
        }
        Some(entry.payload)
    }

    fn put_l2(&self, key: &str, payload: &serde_json::Value) {
        let Some(path) = self.l2_path(key) else {
            return;
        };
        let entry = L2Entry {
            stored_at: Utc::now(),
            payload: payload.clone(),
        };
        match serde_json::to_string(&entry) {
            Ok(text) => {
                if let Err(e) = write_text_atomic(&path, &text) {
                    debug!(key, error = %e, "failed to persist cache entry");
                }
            }
            Err(e) => debug!(key, error = %e, "failed to serialize cache entry"),
        }
    }
}
