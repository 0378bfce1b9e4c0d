use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::time::Clock;

/// Default time-to-live for cached responses.
pub const DEFAULT_TTL: Duration = Duration::from_millis(30_000);

#[derive(Clone, Debug)]
pub struct CacheEntry<V> {
    pub data: V,
    pub stored_at_ms: u64,
    pub ttl_ms: u64,
}

impl<V> CacheEntry<V> {
    /// Valid while `now - stored_at <= ttl`.
    pub fn is_valid(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.stored_at_ms) <= self.ttl_ms
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    /// Percentage of lookups served from cache, 0 when nothing was looked up yet.
    pub hit_rate: f64,
}

/// Process-local key → value cache with lazy TTL expiry.
///
/// Guarantees:
/// - Expired entries are removed only when their key is read, never proactively.
/// - Absent and expired keys both count as misses; behavior is otherwise identical.
/// - While disabled, reads miss silently and writes are dropped.
pub struct ClientCache<V> {
    clock: Arc<dyn Clock>,
    enabled: AtomicBool,
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> ClientCache<V> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            enabled: AtomicBool::new(true),
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        if !self.is_enabled() {
            return None;
        }

        let now = self.clock.now_ms();
        let mut entries = self.entries.lock();

        let Some(entry) = entries.get(key) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if !entry.is_valid(now) {
            entries.remove(key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(target: "cache", key, "cache entry expired");
            return None;
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        debug!(target: "cache", key, "cache hit");
        Some(entry.data.clone())
    }

    pub fn set(&self, key: impl Into<String>, data: V, ttl: Duration) {
        if !self.is_enabled() {
            return;
        }

        let key = key.into();
        let entry = CacheEntry {
            data,
            stored_at_ms: self.clock.now_ms(),
            ttl_ms: ttl.as_millis() as u64,
        };

        debug!(target: "cache", key = %key, ttl_ms = entry.ttl_ms, "cached value");
        self.entries.lock().insert(key, entry);
    }

    #[instrument(skip(self), target = "cache")]
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();

        info!(count, "cache cleared");
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Disabling clears every entry and resets hit/miss accounting.
    #[instrument(skip(self), target = "cache")]
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);

        if !enabled {
            self.clear();
            self.hits.store(0, Ordering::Relaxed);
            self.misses.store(0, Ordering::Relaxed);
        }
        info!(enabled, "cache toggled");
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        let hit_rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64 * 100.0
        };

        CacheStats {
            size: self.len(),
            hit_rate,
        }
    }
}
