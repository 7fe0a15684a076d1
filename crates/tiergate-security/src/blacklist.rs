//! IP blacklist.
//!
//! Each blacklisted address is its own shared-tier key `blacklist:{ip}` with
//! its own TTL, so concurrent escalations of different addresses never touch
//! the same value and entries expire individually.

use std::sync::Arc;
use std::time::Duration;
use tiergate_cache::TieredCache;

use crate::error::Result;

pub struct Blacklist {
    cache: Arc<TieredCache>,
    default_ttl: Duration,
}

impl Blacklist {
    pub fn new(cache: Arc<TieredCache>, default_ttl: Duration) -> Self {
        Self { cache, default_ttl }
    }

    pub fn key(ip: &str) -> String {
        format!("blacklist:{ip}")
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Blacklist `ip` for the default TTL. Re-adding refreshes the TTL.
    pub async fn add(&self, ip: &str) -> Result<()> {
        self.add_for(ip, self.default_ttl).await
    }

    pub async fn add_for(&self, ip: &str, ttl: Duration) -> Result<()> {
        self.cache.mark(&Self::key(ip), ttl).await?;
        crate::metrics::record_blacklist_addition();
        tracing::warn!(ip = %ip, ttl_secs = ttl.as_secs(), "ip blacklisted");
        Ok(())
    }

    pub async fn contains(&self, ip: &str) -> Result<bool> {
        Ok(self.cache.is_marked(&Self::key(ip)).await?)
    }

    /// Lift a blacklist entry. Returns whether `ip` was blacklisted.
    pub async fn remove(&self, ip: &str) -> Result<bool> {
        let removed = self.cache.unmark(&Self::key(ip)).await?;
        if removed {
            tracing::info!(ip = %ip, "ip removed from blacklist");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiergate_cache::{CacheSettings, MemoryStore, SharedStore};

    fn blacklist(store: &MemoryStore) -> Blacklist {
        let cache = Arc::new(TieredCache::new(
            CacheSettings::default(),
            Some(Arc::new(store.clone())),
        ));
        Blacklist::new(cache, Duration::from_secs(86_400))
    }

    #[tokio::test]
    async fn test_add_contains_remove() {
        let store = MemoryStore::new();
        let blacklist = blacklist(&store);

        assert!(!blacklist.contains("203.0.113.7").await.unwrap());
        blacklist.add("203.0.113.7").await.unwrap();
        assert!(blacklist.contains("203.0.113.7").await.unwrap());
        assert!(!blacklist.contains("203.0.113.8").await.unwrap());

        assert!(blacklist.remove("203.0.113.7").await.unwrap());
        assert!(!blacklist.remove("203.0.113.7").await.unwrap());
        assert!(!blacklist.contains("203.0.113.7").await.unwrap());
    }

    #[tokio::test]
    async fn test_entries_expire_individually() {
        let store = MemoryStore::new();
        let blacklist = blacklist(&store);
        blacklist
            .add_for("198.51.100.1", Duration::from_millis(50))
            .await
            .unwrap();
        blacklist.add("198.51.100.2").await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!blacklist.contains("198.51.100.1").await.unwrap());
        assert!(blacklist.contains("198.51.100.2").await.unwrap());
    }

    #[tokio::test]
    async fn test_visible_to_other_instances() {
        let store = MemoryStore::new();
        blacklist(&store).add("192.0.2.1").await.unwrap();
        assert!(blacklist(&store).contains("192.0.2.1").await.unwrap());
        assert!(store.exists("blacklist:192.0.2.1").await.unwrap());
    }
}
