//! Process-local (L1) tier.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A locally cached envelope with its own (capped) TTL.
///
/// The bytes are wrapped in `Arc` so hits clone a pointer, not the payload.
#[derive(Clone, Debug)]
pub struct LocalEntry {
    pub data: Arc<Vec<u8>>,
    pub cached_at: Instant,
    pub ttl: Duration,
}

impl LocalEntry {
    pub fn new(data: Vec<u8>, ttl: Duration) -> Self {
        Self {
            data: Arc::new(data),
            cached_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.cached_at.elapsed() >= self.ttl
    }
}

/// Bounded in-memory tier.
///
/// When full, expired entries are dropped first and then the oldest writes,
/// so the tier never grows past `max_entries`.
pub struct LocalTier {
    map: DashMap<String, LocalEntry>,
    max_entries: usize,
}

impl LocalTier {
    pub fn new(max_entries: usize) -> Self {
        Self {
            map: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        let entry = self.map.get(key)?;
        if entry.is_expired() {
            drop(entry);
            self.map.remove(key);
            return None;
        }
        Some(Arc::clone(&entry.data))
    }

    pub fn insert(&self, key: &str, data: Vec<u8>, ttl: Duration) {
        if !self.map.contains_key(key) && self.map.len() >= self.max_entries {
            self.make_room();
        }
        self.map.insert(key.to_string(), LocalEntry::new(data, ttl));
    }

    pub fn remove(&self, key: &str) -> bool {
        self.map.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Drop expired entries, then at least a tenth of capacity of the oldest
    /// ones, so a full tier is not rescanned on every insert.
    fn make_room(&self) {
        self.map.retain(|_, entry| !entry.is_expired());
        let excess = (self.map.len() + 1).saturating_sub(self.max_entries);
        if excess == 0 {
            return;
        }

        let mut by_age: Vec<(String, Instant)> = self
            .map
            .iter()
            .map(|entry| (entry.key().clone(), entry.cached_at))
            .collect();
        let evict = excess.max(self.max_entries / 10).min(by_age.len());
        if evict < by_age.len() {
            by_age.select_nth_unstable_by_key(evict, |(_, cached_at)| *cached_at);
        }
        for (key, _) in by_age.into_iter().take(evict) {
            self.map.remove(&key);
        }
        tracing::debug!(evicted = evict, "local tier full, evicted oldest entries");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_after_insert() {
        let tier = LocalTier::new(10);
        tier.insert("k", b"v".to_vec(), Duration::from_secs(60));
        assert_eq!(tier.get("k"), Some(Arc::new(b"v".to_vec())));
        assert_eq!(tier.len(), 1);
    }

    #[test]
    fn test_expired_entry_is_removed_on_read() {
        let tier = LocalTier::new(10);
        tier.insert("k", b"v".to_vec(), Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(tier.get("k").is_none());
        assert!(tier.is_empty());
    }

    #[test]
    fn test_evicts_oldest_when_full() {
        let tier = LocalTier::new(2);
        tier.insert("a", b"1".to_vec(), Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(2));
        tier.insert("b", b"2".to_vec(), Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(2));
        tier.insert("c", b"3".to_vec(), Duration::from_secs(60));

        assert_eq!(tier.len(), 2);
        assert!(tier.get("a").is_none());
        assert!(tier.get("b").is_some());
        assert!(tier.get("c").is_some());
    }

    #[test]
    fn test_full_tier_evicts_a_batch() {
        let tier = LocalTier::new(20);
        for i in 0..20 {
            tier.insert(&format!("k{i}"), b"v".to_vec(), Duration::from_secs(60));
            std::thread::sleep(Duration::from_millis(1));
        }
        tier.insert("new", b"v".to_vec(), Duration::from_secs(60));

        assert_eq!(tier.len(), 19);
        assert!(tier.get("k0").is_none());
        assert!(tier.get("k1").is_none());
        assert!(tier.get("k2").is_some());
        assert!(tier.get("new").is_some());

        // Room was made in advance, so the next insert evicts nothing.
        tier.insert("next", b"v".to_vec(), Duration::from_secs(60));
        assert_eq!(tier.len(), 20);
        assert!(tier.get("k2").is_some());
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let tier = LocalTier::new(1);
        tier.insert("a", b"1".to_vec(), Duration::from_secs(60));
        tier.insert("a", b"2".to_vec(), Duration::from_secs(60));
        assert_eq!(tier.get("a"), Some(Arc::new(b"2".to_vec())));
    }
}
