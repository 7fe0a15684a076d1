//! Shared (L2) tier contract.
//!
//! The shared tier is the single source of truth for cached values, tag sets,
//! rate-limit windows, the blacklist and the security logs. Two backends ship
//! with the crate:
//!
//! - [`MemoryStore`]: in-process, used for single-instance deployments, as the
//!   degraded-mode fallback and in tests
//! - [`RedisStore`]: Redis via `deadpool-redis`, shared across instances
//!
//! Every operation that mutates more than one value is atomic in both
//! backends; in particular [`SharedStore::sliding_window`] admits and records
//! a request in one step, so concurrent callers can never both take the last
//! slot of a window.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::time::Duration;

use crate::error::{StoreError, StoreResult};

pub use memory::MemoryStore;
pub use self::redis::RedisStore;

/// Result of one atomic sliding-window evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Whether the request was admitted (and its timestamp recorded).
    pub admitted: bool,
    /// Requests inside the window before this one was considered.
    pub count: u64,
    /// Oldest timestamp still inside the window, in unix milliseconds.
    pub oldest_ms: Option<u64>,
}

/// Cross-process key/value store with TTL support.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Short backend name for logs and stats.
    fn name(&self) -> &'static str;

    /// Cheap connectivity check.
    async fn ping(&self) -> StoreResult<()>;

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()>;

    /// Delete `keys`, returning how many existed.
    async fn delete(&self, keys: &[String]) -> StoreResult<u64>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Add `member` to the set at `key` and reset the set's TTL to `ttl`.
    async fn set_add(&self, key: &str, member: &str, ttl: Duration) -> StoreResult<()>;

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Prepend `value` to the list at `key`, keep at most `max_len` newest
    /// items, refresh the TTL when one is given, and return the new length.
    async fn list_push(
        &self,
        key: &str,
        value: &[u8],
        max_len: usize,
        ttl: Option<Duration>,
    ) -> StoreResult<u64>;

    /// All items of the list at `key`, newest first.
    async fn list_range(&self, key: &str) -> StoreResult<Vec<Vec<u8>>>;

    /// Atomically drop timestamps outside `[now_ms - window, now_ms]`, count the
    /// rest and, if the count is below `limit`, record `now_ms`. The window
    /// key expires after `ttl` without writes.
    async fn sliding_window(
        &self,
        key: &str,
        now_ms: u64,
        window: Duration,
        limit: u64,
        ttl: Duration,
    ) -> StoreResult<WindowSnapshot>;

    /// Remove every key owned by this store.
    async fn flush(&self) -> StoreResult<()>;

    /// Announce that `keys` were removed so other instances drop their local
    /// copies.
    async fn publish_invalidation(&self, _keys: &[String]) -> StoreResult<()> {
        Ok(())
    }

    /// Stream of keys announced through [`SharedStore::publish_invalidation`].
    async fn invalidation_stream(&self) -> StoreResult<BoxStream<'static, String>> {
        Err(StoreError::unavailable(format!(
            "{} store does not support invalidation messages",
            self.name()
        )))
    }
}

/// Channel used for cross-instance invalidation messages.
pub const INVALIDATION_CHANNEL: &str = "cache:invalidate";
