//! Cross-instance local-tier invalidation.

use futures_util::StreamExt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::error::StoreResult;
use crate::tiered::TieredCache;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Subscribes to the shared tier's invalidation channel and drops announced
/// keys from this instance's local tier.
///
/// ```text
/// Instance 1: cache.delete("report:7")
///   ↓
/// shared tier: PUBLISH cache:invalidate "report:7"
///   ↓
/// Instance 2: listener receives "report:7" → removes it from its local tier
/// ```
///
/// Without a listener, stale local copies on other instances live until the
/// local TTL cap.
pub struct InvalidationListener {
    cache: Weak<TieredCache>,
}

impl InvalidationListener {
    pub fn new(cache: &Arc<TieredCache>) -> Self {
        Self {
            cache: Arc::downgrade(cache),
        }
    }

    /// Spawn the listener. Returns `None` when there is nothing to listen to
    /// (no shared tier or no local tier).
    ///
    /// The task resubscribes with exponential backoff when the subscription
    /// fails or closes, and exits once the cache is dropped.
    pub fn start(self) -> Option<JoinHandle<()>> {
        let cache = self.cache.upgrade()?;
        if !cache.settings().local_enabled || !cache.has_shared_tier() {
            return None;
        }
        drop(cache);

        Some(tokio::spawn(async move {
            let mut backoff = INITIAL_BACKOFF;
            loop {
                match self.run().await {
                    Ok(true) => return,
                    Ok(false) => {
                        backoff = INITIAL_BACKOFF;
                        tracing::warn!("cache invalidation stream closed, resubscribing");
                    }
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            backoff_secs = backoff.as_secs(),
                            "cache invalidation listener error, reconnecting"
                        );
                    }
                }
                if self.cache.strong_count() == 0 {
                    return;
                }
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }))
    }

    /// Consume one subscription. `Ok(true)` means the cache is gone.
    async fn run(&self) -> StoreResult<bool> {
        let Some(store) = self.cache.upgrade().and_then(|c| c.shared_store()) else {
            return Ok(true);
        };
        let mut stream = store.invalidation_stream().await?;
        drop(store);

        while let Some(key) = stream.next().await {
            let Some(cache) = self.cache.upgrade() else {
                return Ok(true);
            };
            cache.evict_local(&key);
            tracing::debug!(key = %key, "local cache entry invalidated by peer");
        }
        Ok(false)
    }
}
