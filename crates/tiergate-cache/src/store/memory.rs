//! In-process shared-tier backend.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

use super::{SharedStore, WindowSnapshot};
use crate::error::{StoreError, StoreResult};

/// Writes between sweeps of expired slots.
const PURGE_EVERY_WRITES: u64 = 1024;

#[derive(Debug, Clone)]
enum Value {
    Bytes(Vec<u8>),
    Set(HashSet<String>),
    List(VecDeque<Vec<u8>>),
    Window(VecDeque<u64>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

struct Inner {
    map: DashMap<String, Slot>,
    available: AtomicBool,
    writes: AtomicU64,
    invalidations: broadcast::Sender<String>,
}

/// Shared-tier backend living in process memory.
///
/// Clones share the same map, so two caches built on clones of one
/// `MemoryStore` observe each other's writes the way two processes sharing a
/// Redis instance would. [`MemoryStore::set_available`] simulates an outage:
/// while unavailable every call fails with [`StoreError::Unavailable`].
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                map: DashMap::new(),
                available: AtomicBool::new(true),
                writes: AtomicU64::new(0),
                invalidations: broadcast::channel(1024).0,
            }),
        }
    }

    /// Toggle simulated availability.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Number of live keys (expired ones are not counted).
    pub fn len(&self) -> usize {
        self.inner.map.iter().filter(|slot| !slot.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired slots; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.inner.map.len();
        self.inner.map.retain(|_, slot| !slot.is_expired());
        before.saturating_sub(self.inner.map.len())
    }

    /// Count a write and sweep expired slots every [`PURGE_EVERY_WRITES`].
    ///
    /// Must not be called while holding a map guard.
    fn note_write(&self) {
        let writes = self.inner.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % PURGE_EVERY_WRITES == 0 {
            let removed = self.purge_expired();
            if removed > 0 {
                tracing::debug!(removed, "purged expired memory store slots");
            }
        }
    }

    fn check(&self) -> StoreResult<()> {
        if self.inner.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::unavailable("memory store marked unavailable"))
        }
    }

    /// Live slot for `key`, removing it first if it has expired.
    fn live(&self, key: &str) -> Option<dashmap::mapref::one::Ref<'_, String, Slot>> {
        self.inner.map.remove_if(key, |_, slot| slot.is_expired());
        self.inner.map.get(key)
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check()
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.check()?;
        Ok(self.live(key).and_then(|slot| match &slot.value {
            Value::Bytes(bytes) => Some(bytes.clone()),
            _ => None,
        }))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()> {
        self.check()?;
        self.note_write();
        self.inner
            .map
            .insert(key.to_string(), Slot::new(Value::Bytes(value.to_vec()), Some(ttl)));
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        self.check()?;
        let mut removed = 0;
        for key in keys {
            if let Some((_, slot)) = self.inner.map.remove(key) {
                if !slot.is_expired() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.check()?;
        Ok(self.live(key).is_some())
    }

    async fn set_add(&self, key: &str, member: &str, ttl: Duration) -> StoreResult<()> {
        self.check()?;
        self.note_write();
        let expires_at = Some(Instant::now() + ttl);
        match self.inner.map.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                let expired = slot.is_expired();
                match &mut slot.value {
                    Value::Set(members) if !expired => {
                        members.insert(member.to_string());
                    }
                    _ => {
                        slot.value = Value::Set(HashSet::from([member.to_string()]));
                    }
                }
                slot.expires_at = expires_at;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    value: Value::Set(HashSet::from([member.to_string()])),
                    expires_at,
                });
            }
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        self.check()?;
        Ok(self
            .live(key)
            .map(|slot| match &slot.value {
                Value::Set(members) => members.iter().cloned().collect(),
                _ => Vec::new(),
            })
            .unwrap_or_default())
    }

    async fn list_push(
        &self,
        key: &str,
        value: &[u8],
        max_len: usize,
        ttl: Option<Duration>,
    ) -> StoreResult<u64> {
        self.check()?;
        self.note_write();
        let mut slot = self
            .inner
            .map
            .entry(key.to_string())
            .or_insert_with(|| Slot::new(Value::List(VecDeque::new()), None));
        let expired = slot.is_expired();
        let mut items = match std::mem::replace(&mut slot.value, Value::List(VecDeque::new())) {
            Value::List(items) if !expired => items,
            _ => {
                slot.expires_at = None;
                VecDeque::new()
            }
        };
        if let Some(ttl) = ttl {
            slot.expires_at = Some(Instant::now() + ttl);
        }
        items.push_front(value.to_vec());
        items.truncate(max_len);
        let len = items.len() as u64;
        slot.value = Value::List(items);
        Ok(len)
    }

    async fn list_range(&self, key: &str) -> StoreResult<Vec<Vec<u8>>> {
        self.check()?;
        Ok(self
            .live(key)
            .map(|slot| match &slot.value {
                Value::List(items) => items.iter().cloned().collect(),
                _ => Vec::new(),
            })
            .unwrap_or_default())
    }

    async fn sliding_window(
        &self,
        key: &str,
        now_ms: u64,
        window: Duration,
        limit: u64,
        ttl: Duration,
    ) -> StoreResult<WindowSnapshot> {
        self.check()?;
        self.note_write();
        let window_start = now_ms.saturating_sub(window.as_millis() as u64);

        // The entry guard holds the shard lock, so filter + count + append is atomic.
        let mut slot = self
            .inner
            .map
            .entry(key.to_string())
            .or_insert_with(|| Slot::new(Value::Window(VecDeque::new()), Some(ttl)));
        let expired = slot.is_expired();
        let mut stamps = match std::mem::replace(&mut slot.value, Value::Window(VecDeque::new())) {
            Value::Window(stamps) if !expired => stamps,
            _ => VecDeque::new(),
        };
        stamps.retain(|&t| t >= window_start && t <= now_ms);

        let count = stamps.len() as u64;
        let admitted = count < limit;
        if admitted {
            stamps.push_back(now_ms);
        }
        let oldest_ms = stamps.iter().min().copied();
        slot.value = Value::Window(stamps);
        if admitted || expired {
            slot.expires_at = Some(Instant::now() + ttl);
        }

        Ok(WindowSnapshot {
            admitted,
            count,
            oldest_ms,
        })
    }

    async fn flush(&self) -> StoreResult<()> {
        self.check()?;
        self.inner.map.clear();
        Ok(())
    }

    async fn publish_invalidation(&self, keys: &[String]) -> StoreResult<()> {
        self.check()?;
        for key in keys {
            // No receivers is fine: nobody holds a local copy.
            let _ = self.inner.invalidations.send(key.clone());
        }
        Ok(())
    }

    async fn invalidation_stream(&self) -> StoreResult<BoxStream<'static, String>> {
        self.check()?;
        let receiver = self.inner.invalidations.subscribe();
        let stream = futures_util::stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(key) => return Some((key, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "invalidation listener lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }
}
