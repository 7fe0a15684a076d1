//! Cache metrics, recorded through the `metrics` facade.
//!
//! Nothing is exported from here; the embedding process installs whatever
//! recorder it uses (Prometheus, StatsD, ...).

use metrics::{counter, gauge};

pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_WRITES_TOTAL: &str = "cache_writes_total";
    pub const CACHE_TAG_INVALIDATIONS_TOTAL: &str = "cache_tag_invalidations_total";
    pub const CACHE_SHARED_FAILURES_TOTAL: &str = "cache_shared_failures_total";
    pub const CACHE_SHARED_HEALTHY: &str = "cache_shared_healthy";
}

/// Record a hit in `tier` ("local" or "shared").
pub fn record_cache_hit(tier: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "tier" => tier).increment(1);
}

pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

pub fn record_cache_write() {
    counter!(names::CACHE_WRITES_TOTAL).increment(1);
}

pub fn record_tag_invalidation(removed: usize) {
    counter!(names::CACHE_TAG_INVALIDATIONS_TOTAL).increment(removed as u64);
}

pub fn record_shared_failure(op: &'static str) {
    counter!(names::CACHE_SHARED_FAILURES_TOTAL, "op" => op).increment(1);
}

pub fn set_shared_healthy(healthy: bool) {
    gauge!(names::CACHE_SHARED_HEALTHY).set(if healthy { 1.0 } else { 0.0 });
}
