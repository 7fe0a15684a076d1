//! Cache warming.
//!
//! A warm-up run walks a declarative list of entries and fills the ones that
//! are missing. A failing producer only skips its own entry; partial warming
//! is normal.

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::tiered::TieredCache;

type Producer<T> = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<Option<T>>> + Send>;

/// One entry to pre-populate.
pub struct WarmEntry<T> {
    pub key: String,
    pub ttl: Duration,
    pub tags: Vec<String>,
    producer: Producer<T>,
}

impl<T> WarmEntry<T> {
    pub fn new<F, Fut>(key: impl Into<String>, ttl: Duration, producer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Option<T>>> + Send + 'static,
    {
        Self {
            key: key.into(),
            ttl,
            tags: Vec::new(),
            producer: Box::new(move || producer().boxed()),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

impl<T> std::fmt::Debug for WarmEntry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarmEntry")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

/// Outcome of warming a single entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmOutcome {
    /// Producer ran and the value was stored.
    Warmed,
    /// Key was already cached; producer not called.
    AlreadyCached,
    /// Producer returned no value.
    Empty,
    /// Producer or store failed; entry skipped.
    Failed,
}

#[derive(Clone)]
pub struct CacheWarmer {
    cache: Arc<TieredCache>,
}

impl CacheWarmer {
    pub fn new(cache: Arc<TieredCache>) -> Self {
        Self { cache }
    }

    /// Warm every entry in order, returning how many were written.
    pub async fn warm<T>(&self, entries: Vec<WarmEntry<T>>) -> usize
    where
        T: Serialize + DeserializeOwned,
    {
        let total = entries.len();
        let mut warmed = 0;
        for entry in entries {
            if self.warm_one(entry).await == WarmOutcome::Warmed {
                warmed += 1;
            }
        }
        tracing::info!(total, warmed, "cache warm-up finished");
        warmed
    }

    pub async fn warm_one<T>(&self, entry: WarmEntry<T>) -> WarmOutcome
    where
        T: Serialize + DeserializeOwned,
    {
        let WarmEntry {
            key,
            ttl,
            tags,
            producer,
        } = entry;

        if self.cache.get::<T>(&key).await.is_some() {
            return WarmOutcome::AlreadyCached;
        }

        let value = match producer().await {
            Ok(Some(value)) => value,
            Ok(None) => return WarmOutcome::Empty,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache warm-up producer failed, skipping");
                return WarmOutcome::Failed;
            }
        };

        let tags: Vec<&str> = tags.iter().map(String::as_str).collect();
        match self.cache.set(&key, &value, ttl, &tags).await {
            Ok(()) => WarmOutcome::Warmed,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache warm-up write rejected, skipping");
                WarmOutcome::Failed
            }
        }
    }
}
