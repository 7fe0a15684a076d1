//! Two-tier cache: process-local L1 in front of a shared L2.
//!
//! ## Lookup order
//!
//! ```text
//! get(key) → local (DashMap) → shared (SharedStore) → miss
//!                                   ↓ hit
//!                  mirrored into local with min(remaining TTL, local cap)
//! ```
//!
//! ## Graceful degradation
//!
//! A failing shared tier never surfaces as an error. The first failure is
//! logged and the tier is marked down; while down, shared calls are skipped
//! and the cache serves from the local tier only. After `shared_retry_secs`
//! the next call probes the shared tier again, and a success is logged as a
//! recovery. Tag invalidation needs the shared tier and returns `0` without
//! it.
//!
//! The shared tier is authoritative. The local tier is a read-through,
//! write-through copy whose TTL is capped so volatile data never overstays.

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::envelope::Envelope;
use crate::error::{CacheError, Result, StoreError, StoreResult};
use crate::local::LocalTier;
use crate::settings::CacheSettings;
use crate::stats::{CacheStats, Counters};
use crate::store::{MemoryStore, SharedStore, WindowSnapshot};
use crate::tags::TagIndex;
use crate::now_millis;

/// Tracks whether the shared tier is reachable.
///
/// `down_since_ms == 0` means healthy.
struct SharedHealth {
    down_since_ms: AtomicU64,
    retry_ms: u64,
}

impl SharedHealth {
    fn new(retry: Duration) -> Self {
        Self {
            down_since_ms: AtomicU64::new(0),
            retry_ms: retry.as_millis() as u64,
        }
    }

    fn is_healthy(&self) -> bool {
        self.down_since_ms.load(Ordering::Acquire) == 0
    }

    fn should_try(&self) -> bool {
        let down_since = self.down_since_ms.load(Ordering::Acquire);
        down_since == 0 || now_millis().saturating_sub(down_since) >= self.retry_ms
    }

    fn on_success(&self, backend: &'static str) {
        if self.down_since_ms.swap(0, Ordering::AcqRel) != 0 {
            tracing::info!(backend, "shared cache tier recovered");
            crate::metrics::set_shared_healthy(true);
        }
    }

    fn on_failure(&self, backend: &'static str, op: &'static str, error: &StoreError) {
        crate::metrics::record_shared_failure(op);
        if !error.is_connectivity() {
            tracing::debug!(backend, op, error = %error, "shared cache tier rejected a value");
            return;
        }
        let previous = self.down_since_ms.swap(now_millis().max(1), Ordering::AcqRel);
        if previous == 0 {
            tracing::warn!(
                backend,
                op,
                error = %error,
                retry_ms = self.retry_ms,
                "shared cache tier unavailable, serving from local tier only"
            );
            crate::metrics::set_shared_healthy(false);
        } else {
            tracing::debug!(backend, op, error = %error, "shared cache tier still unavailable");
        }
    }
}

/// Hierarchical cache with tag invalidation.
///
/// Construct one per process and share it behind an `Arc`.
pub struct TieredCache {
    settings: CacheSettings,
    local: Option<LocalTier>,
    shared: Option<Arc<dyn SharedStore>>,
    tags: TagIndex,
    /// Holds bookkeeping state (windows, lists, marks) when the shared tier
    /// is absent or down.
    fallback: MemoryStore,
    health: SharedHealth,
    counters: Counters,
}

fn value_key(key: &str) -> String {
    format!("cache:{key}")
}

fn validate(key: &str, ttl: Duration, tags: &[&str]) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::EmptyKey);
    }
    if ttl.as_millis() == 0 {
        return Err(CacheError::InvalidTtl {
            key: key.to_string(),
        });
    }
    if tags.iter().any(|tag| tag.is_empty()) {
        return Err(CacheError::EmptyTag {
            key: key.to_string(),
        });
    }
    Ok(())
}

impl TieredCache {
    /// Create a cache; `shared = None` runs in local-only mode.
    pub fn new(settings: CacheSettings, shared: Option<Arc<dyn SharedStore>>) -> Self {
        let local = settings
            .local_enabled
            .then(|| LocalTier::new(settings.local_max_entries));
        match &shared {
            Some(store) => tracing::info!(
                backend = store.name(),
                local = settings.local_enabled,
                "tiered cache created"
            ),
            None => tracing::info!(
                local = settings.local_enabled,
                "tiered cache created without shared tier"
            ),
        }
        Self {
            tags: TagIndex::new(settings.tag_grace()),
            health: SharedHealth::new(settings.shared_retry()),
            local,
            shared,
            fallback: MemoryStore::new(),
            counters: Counters::default(),
            settings,
        }
    }

    pub fn local_only(settings: CacheSettings) -> Self {
        Self::new(settings, None)
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn has_shared_tier(&self) -> bool {
        self.shared.is_some()
    }

    /// Run `call` against the shared tier.
    ///
    /// Returns `None` when there is no shared tier, when it is in its retry
    /// cool-down, or when the call fails (the failure is recorded).
    async fn shared_call<'a, T>(
        &'a self,
        op: &'static str,
        call: impl FnOnce(&'a dyn SharedStore) -> BoxFuture<'a, StoreResult<T>>,
    ) -> Option<T> {
        let store = self.shared.as_deref()?;
        if !self.health.should_try() {
            return None;
        }
        match call(store).await {
            Ok(value) => {
                self.health.on_success(store.name());
                Some(value)
            }
            Err(e) => {
                self.health.on_failure(store.name(), op, &e);
                None
            }
        }
    }

    /// Run bookkeeping against the shared tier, or against the process-local
    /// fallback store when the shared tier cannot serve it.
    async fn bookkeeping<'a, T>(
        &'a self,
        op: &'static str,
        call: impl Fn(&'a dyn SharedStore) -> BoxFuture<'a, StoreResult<T>>,
    ) -> StoreResult<T> {
        if let Some(value) = self.shared_call(op, &call).await {
            return Ok(value);
        }
        let fallback: &dyn SharedStore = &self.fallback;
        call(fallback).await
    }

    /// Look a key up in the local tier, then the shared tier.
    ///
    /// Undecodable or type-mismatched payloads count as misses.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if key.is_empty() {
            tracing::warn!("cache get with empty key");
            self.counters.miss();
            return None;
        }
        let now = now_millis();

        if let Some(local) = &self.local {
            if let Some(bytes) = local.get(key) {
                match open_live::<T>(&bytes, now) {
                    Ok(Some((value, _))) => {
                        tracing::debug!(key = %key, "cache hit (local)");
                        self.counters.local_hit();
                        return Some(value);
                    }
                    Ok(None) => {
                        local.remove(key);
                    }
                    Err(e) => {
                        tracing::debug!(key = %key, error = %e, "undecodable local entry dropped");
                        local.remove(key);
                    }
                }
            }
        }

        let shared_key = value_key(key);
        if let Some(Some(bytes)) = self.shared_call("get", |s| s.get(&shared_key)).await {
            match open_live::<T>(&bytes, now) {
                Ok(Some((value, remaining))) => {
                    if let Some(local) = &self.local {
                        local.insert(key, bytes, remaining.min(self.settings.local_ttl_cap()));
                    }
                    tracing::debug!(key = %key, "cache hit (shared)");
                    self.counters.shared_hit();
                    return Some(value);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(key = %key, error = %e, "undecodable shared entry treated as miss");
                }
            }
        }

        tracing::debug!(key = %key, "cache miss");
        self.counters.miss();
        None
    }

    /// Return the cached value or compute, store and return it.
    ///
    /// `producer` runs at most once per call, and only on a miss. `Ok(None)`
    /// from the producer is passed through and not cached. Concurrent misses
    /// for the same key are not coalesced: each caller runs its own producer.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        tags: &[&str],
        producer: F,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Option<T>>>,
    {
        validate(key, ttl, tags)?;
        if let Some(value) = self.get(key).await {
            return Ok(Some(value));
        }

        let produced = producer().await.map_err(|source| CacheError::Producer {
            key: key.to_string(),
            source,
        })?;
        if let Some(value) = &produced {
            self.set(key, value, ttl, tags).await?;
        }
        Ok(produced)
    }

    /// Write to both tiers and associate the key with `tags`.
    ///
    /// The local copy lives for `min(ttl, local_ttl_cap)`.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
        tags: &[&str],
    ) -> Result<()> {
        validate(key, ttl, tags)?;
        let bytes = Envelope::seal(value, self.settings.encoding, ttl, now_millis())
            .map_err(|e| CacheError::encode(key, e))?;

        if let Some(local) = &self.local {
            local.insert(key, bytes.clone(), ttl.min(self.settings.local_ttl_cap()));
        }

        let shared_key = value_key(key);
        let stored = self
            .shared_call("set", |s| s.set(&shared_key, &bytes, ttl))
            .await
            .is_some();
        if stored {
            for tag in tags {
                let tag_index = &self.tags;
                self.shared_call("tag", |s| tag_index.associate(s, tag, key, ttl).boxed())
                    .await;
            }
        }

        self.counters.write();
        tracing::debug!(key = %key, ttl_ms = ttl.as_millis() as u64, shared = stored, "cache set");
        Ok(())
    }

    /// Remove `key` from both tiers. Deleting a missing key is not an error.
    pub async fn delete(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(CacheError::EmptyKey);
        }
        if let Some(local) = &self.local {
            local.remove(key);
        }
        let keys = [value_key(key)];
        self.shared_call("delete", |s| s.delete(&keys)).await;
        let announced = [key.to_string()];
        self.shared_call("publish", |s| s.publish_invalidation(&announced))
            .await;
        tracing::debug!(key = %key, "cache delete");
        Ok(())
    }

    /// Drop `key` from the local tier only. Used when another instance
    /// announces an invalidation.
    pub(crate) fn evict_local(&self, key: &str) {
        if let Some(local) = &self.local {
            local.remove(key);
        }
    }

    pub(crate) fn shared_store(&self) -> Option<Arc<dyn SharedStore>> {
        self.shared.clone()
    }

    /// Whether `key` is present in either tier, without touching the counters.
    pub async fn contains(&self, key: &str) -> bool {
        if let Some(local) = &self.local {
            if local.get(key).is_some() {
                return true;
            }
        }
        let shared_key = value_key(key);
        self.shared_call("exists", |s| s.exists(&shared_key))
            .await
            .unwrap_or(false)
    }

    /// Evict every key associated with `tag` from both tiers, then the tag
    /// itself. Returns the number of keys that were associated, or `0` when
    /// the shared tier is absent or down.
    pub async fn invalidate_by_tag(&self, tag: &str) -> usize {
        if self.shared.is_none() {
            tracing::debug!(tag = %tag, "tag invalidation skipped: no shared tier");
            return 0;
        }
        let tag_index = &self.tags;
        let Some(members) = self
            .shared_call("tag_members", |s| tag_index.members(s, tag).boxed())
            .await
        else {
            return 0;
        };

        if let Some(local) = &self.local {
            for key in &members {
                local.remove(key);
            }
        }
        let shared_keys: Vec<String> = members.iter().map(|k| value_key(k)).collect();
        self.shared_call("delete", |s| s.delete(&shared_keys)).await;
        self.shared_call("tag_remove", |s| tag_index.remove(s, tag).boxed())
            .await;
        self.shared_call("publish", |s| s.publish_invalidation(&members))
            .await;

        crate::metrics::record_tag_invalidation(members.len());
        tracing::info!(tag = %tag, keys = members.len(), "cache tag invalidated");
        members.len()
    }

    /// Clear both tiers. Returns how many tiers were cleared (0, 1 or 2).
    pub async fn flush(&self) -> usize {
        let mut cleared = 0;
        if let Some(local) = &self.local {
            local.clear();
            cleared += 1;
        }
        if self.shared_call("flush", |s| s.flush()).await.is_some() {
            cleared += 1;
        }
        let _ = self.fallback.flush().await;
        tracing::info!(tiers = cleared, "cache flushed");
        cleared
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            local_enabled: self.local.is_some(),
            shared_enabled: self.shared.is_some(),
            shared_healthy: self.shared.is_some() && self.health.is_healthy(),
            local_entries: self.local.as_ref().map_or(0, LocalTier::len),
            ..self.counters.snapshot()
        }
    }

    /// Probe the shared tier (for health checks).
    pub async fn is_shared_available(&self) -> bool {
        match &self.shared {
            Some(store) => store.ping().await.is_ok(),
            None => false,
        }
    }

    // -------------------------------------------------------------------------
    // Bookkeeping primitives for the admission layer
    // -------------------------------------------------------------------------

    /// Atomically evaluate and record one request in a sliding window.
    pub async fn record_in_window(
        &self,
        key: &str,
        now_ms: u64,
        window: Duration,
        limit: u64,
        ttl: Duration,
    ) -> StoreResult<WindowSnapshot> {
        self.bookkeeping("window", |s| s.sliding_window(key, now_ms, window, limit, ttl))
            .await
    }

    /// Push a JSON-encoded item onto a capped list, returning its new length.
    pub async fn push_capped<T: Serialize>(
        &self,
        key: &str,
        item: &T,
        max_len: usize,
        ttl: Option<Duration>,
    ) -> StoreResult<u64> {
        let bytes = serde_json::to_vec(item).map_err(|e| StoreError::Codec(e.to_string()))?;
        self.bookkeeping("list_push", |s| s.list_push(key, &bytes, max_len, ttl))
            .await
    }

    /// Read a capped list, newest first. Items that fail to decode are skipped.
    pub async fn read_list<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Vec<T>> {
        let raw = self.bookkeeping("list_range", |s| s.list_range(key)).await?;
        Ok(raw
            .iter()
            .filter_map(|bytes| serde_json::from_slice(bytes).ok())
            .collect())
    }

    /// Set a presence marker that expires after `ttl`.
    pub async fn mark(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        self.bookkeeping("mark", |s| s.set(key, b"1", ttl)).await
    }

    pub async fn is_marked(&self, key: &str) -> StoreResult<bool> {
        self.bookkeeping("is_marked", |s| s.exists(key)).await
    }

    /// Remove a marker, returning whether it existed.
    pub async fn unmark(&self, key: &str) -> StoreResult<bool> {
        let keys = [key.to_string()];
        self.bookkeeping("unmark", |s| s.delete(&keys))
            .await
            .map(|removed| removed > 0)
    }
}

/// Decode an envelope, returning the value and its remaining lifetime, or
/// `None` if it has already expired.
fn open_live<T: DeserializeOwned>(bytes: &[u8], now_ms: u64) -> StoreResult<Option<(T, Duration)>> {
    let envelope = Envelope::open(bytes)?;
    match envelope.remaining(now_ms) {
        Some(remaining) => Ok(Some((envelope.decode()?, remaining))),
        None => Ok(None),
    }
}
