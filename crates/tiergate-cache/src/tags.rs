//! Tag index: which cache keys must be evicted together.
//!
//! A tag is a set in the shared tier (`tag:{name}`) holding plain cache keys.
//! Every association refreshes the set's TTL to `ttl + grace`, so a tag that
//! keeps receiving writes stays alive while an abandoned one expires and
//! quietly drops its stale references. There is no way to remove a single key
//! from a tag; membership only ends when the tag is invalidated or expires.

use std::time::Duration;

use crate::error::StoreResult;
use crate::store::SharedStore;

#[derive(Debug, Clone)]
pub struct TagIndex {
    grace: Duration,
}

impl TagIndex {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn tag_key(tag: &str) -> String {
        format!("tag:{tag}")
    }

    pub async fn associate(
        &self,
        store: &dyn SharedStore,
        tag: &str,
        key: &str,
        ttl: Duration,
    ) -> StoreResult<()> {
        store
            .set_add(&Self::tag_key(tag), key, ttl + self.grace)
            .await
    }

    pub async fn members(&self, store: &dyn SharedStore, tag: &str) -> StoreResult<Vec<String>> {
        store.set_members(&Self::tag_key(tag)).await
    }

    pub async fn remove(&self, store: &dyn SharedStore, tag: &str) -> StoreResult<()> {
        store.delete(&[Self::tag_key(tag)]).await.map(|_| ())
    }
}
