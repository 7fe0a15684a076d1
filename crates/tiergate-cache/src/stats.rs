use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Cumulative cache counters for the lifetime of the process.
///
/// Serialises with camelCase field names so it can be returned verbatim from
/// a status endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub local_hits: u64,
    pub shared_hits: u64,
    pub writes: u64,
    /// Hit rate as a percentage, rounded to two decimals.
    pub hit_rate: f64,
    pub local_enabled: bool,
    pub shared_enabled: bool,
    /// Whether the shared tier answered its most recent call.
    pub shared_healthy: bool,
    pub local_entries: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    local_hits: AtomicU64,
    shared_hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

impl Counters {
    pub(crate) fn local_hit(&self) {
        self.local_hits.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_cache_hit("local");
    }

    pub(crate) fn shared_hit(&self) {
        self.shared_hits.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_cache_hit("shared");
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_cache_miss();
    }

    pub(crate) fn write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_cache_write();
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        let local_hits = self.local_hits.load(Ordering::Relaxed);
        let shared_hits = self.shared_hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let hits = local_hits + shared_hits;
        CacheStats {
            hits,
            misses,
            local_hits,
            shared_hits,
            writes: self.writes.load(Ordering::Relaxed),
            hit_rate: hit_rate(hits, misses),
            ..Default::default()
        }
    }
}

fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        ((hits as f64 / total as f64) * 10_000.0).round() / 100.0
    }
}
