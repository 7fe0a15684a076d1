//! Redis shared-tier backend.

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use redis::AsyncCommands;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use super::{INVALIDATION_CHANNEL, SharedStore, WindowSnapshot};
use crate::error::{StoreError, StoreResult};

/// Filter, count and conditionally record in one server-side step.
///
/// KEYS[1] window key; ARGV: now_ms, window_ms, limit, ttl_ms, member.
/// Returns `{admitted, count, oldest_ms}` with `oldest_ms = -1` for an empty window.
static SLIDING_WINDOW_SCRIPT: LazyLock<redis::Script> = LazyLock::new(|| {
    redis::Script::new(
        r"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])
redis.call('ZREMRANGEBYSCORE', key, '-inf', '(' .. (now - window))
redis.call('ZREMRANGEBYSCORE', key, '(' .. now, '+inf')
local count = redis.call('ZCARD', key)
local admitted = 0
if count < limit then
  redis.call('ZADD', key, now, ARGV[5])
  redis.call('PEXPIRE', key, ttl)
  admitted = 1
end
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local oldest_ms = -1
if oldest[2] then
  oldest_ms = tonumber(oldest[2])
end
return {admitted, count, oldest_ms}
",
    )
});

/// Shared tier backed by Redis.
///
/// All keys are namespaced with `prefix`, and [`SharedStore::flush`] only
/// removes keys under that prefix. Every call is bounded by `timeout`; a call
/// that exceeds it fails with [`StoreError::Timeout`].
///
/// Invalidation messages need a dedicated pub/sub connection, which is only
/// available when the store knows its URL (see [`RedisStore::connect`] and
/// [`RedisStore::with_url`]).
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    prefix: String,
    timeout: Duration,
    url: Option<String>,
}

impl RedisStore {
    pub fn new(pool: Pool, prefix: impl Into<String>, timeout: Duration) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
            timeout,
            url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Build a pool for `url` and verify it answers `PING`.
    pub async fn connect(
        url: &str,
        pool_size: usize,
        timeout: Duration,
        prefix: impl Into<String>,
    ) -> StoreResult<Self> {
        let mut redis_config = deadpool_redis::Config::from_url(url);
        let pool_config = redis_config.pool.get_or_insert_with(Default::default);
        pool_config.max_size = pool_size;
        pool_config.timeouts.wait = Some(timeout);
        pool_config.timeouts.create = Some(timeout);
        pool_config.timeouts.recycle = Some(timeout);

        let pool = redis_config
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| StoreError::unavailable(format!("failed to create Redis pool: {e}")))?;

        let store = Self::new(pool, prefix, timeout).with_url(url);
        store.ping().await?;
        Ok(store)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    async fn conn(&self) -> StoreResult<Connection> {
        Ok(self.pool.get().await?)
    }

    async fn bounded<T>(&self, fut: impl Future<Output = StoreResult<T>>) -> StoreResult<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout.as_millis() as u64)),
        }
    }
}

fn ttl_ms(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl SharedStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> StoreResult<()> {
        self.bounded(async {
            let mut conn = self.conn().await?;
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let key = self.key(key);
        self.bounded(async {
            let mut conn = self.conn().await?;
            let value: Option<Vec<u8>> = conn.get(&key).await?;
            Ok(value)
        })
        .await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()> {
        let key = self.key(key);
        self.bounded(async {
            let mut conn = self.conn().await?;
            let _: () = conn.pset_ex(&key, value, ttl_ms(ttl)).await?;
            tracing::debug!(key = %key, ttl_ms = ttl_ms(ttl), "redis set");
            Ok(())
        })
        .await
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let keys: Vec<String> = keys.iter().map(|k| self.key(k)).collect();
        self.bounded(async {
            let mut conn = self.conn().await?;
            let removed: u64 = conn.del(&keys).await?;
            Ok(removed)
        })
        .await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let key = self.key(key);
        self.bounded(async {
            let mut conn = self.conn().await?;
            let exists: bool = conn.exists(&key).await?;
            Ok(exists)
        })
        .await
    }

    async fn set_add(&self, key: &str, member: &str, ttl: Duration) -> StoreResult<()> {
        let key = self.key(key);
        self.bounded(async {
            let mut conn = self.conn().await?;
            let _: () = redis::pipe()
                .atomic()
                .sadd(&key, member)
                .ignore()
                .pexpire(&key, ttl_ms(ttl) as i64)
                .ignore()
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
        .await
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let key = self.key(key);
        self.bounded(async {
            let mut conn = self.conn().await?;
            let members: Vec<String> = conn.smembers(&key).await?;
            Ok(members)
        })
        .await
    }

    async fn list_push(
        &self,
        key: &str,
        value: &[u8],
        max_len: usize,
        ttl: Option<Duration>,
    ) -> StoreResult<u64> {
        let key = self.key(key);
        let stop = max_len.max(1) as isize - 1;
        self.bounded(async {
            let mut conn = self.conn().await?;
            let mut pipe = redis::pipe();
            pipe.atomic()
                .lpush(&key, value)
                .ignore()
                .ltrim(&key, 0, stop)
                .ignore();
            if let Some(ttl) = ttl {
                pipe.pexpire(&key, ttl_ms(ttl) as i64).ignore();
            }
            pipe.llen(&key);
            let (len,): (u64,) = pipe.query_async(&mut conn).await?;
            Ok(len)
        })
        .await
    }

    async fn list_range(&self, key: &str) -> StoreResult<Vec<Vec<u8>>> {
        let key = self.key(key);
        self.bounded(async {
            let mut conn = self.conn().await?;
            let items: Vec<Vec<u8>> = conn.lrange(&key, 0, -1).await?;
            Ok(items)
        })
        .await
    }

    async fn sliding_window(
        &self,
        key: &str,
        now_ms: u64,
        window: Duration,
        limit: u64,
        ttl: Duration,
    ) -> StoreResult<WindowSnapshot> {
        let key = self.key(key);
        let member = format!("{now_ms}-{}", uuid::Uuid::new_v4().simple());
        self.bounded(async {
            let mut conn = self.conn().await?;
            let (admitted, count, oldest): (i64, i64, i64) = SLIDING_WINDOW_SCRIPT
                .key(&key)
                .arg(now_ms)
                .arg(window.as_millis() as u64)
                .arg(limit)
                .arg(ttl_ms(ttl))
                .arg(&member)
                .invoke_async(&mut conn)
                .await?;
            Ok(WindowSnapshot {
                admitted: admitted == 1,
                count: count.max(0) as u64,
                oldest_ms: (oldest >= 0).then_some(oldest as u64),
            })
        })
        .await
    }

    async fn flush(&self) -> StoreResult<()> {
        let pattern = format!("{}*", self.prefix);
        self.bounded(async {
            let mut conn = self.conn().await?;
            let mut cursor: u64 = 0;
            loop {
                let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(500)
                    .query_async(&mut conn)
                    .await?;
                if !keys.is_empty() {
                    let _: u64 = conn.del(&keys).await?;
                }
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            tracing::info!(pattern = %pattern, "redis keys flushed");
            Ok(())
        })
        .await
    }

    async fn publish_invalidation(&self, keys: &[String]) -> StoreResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let channel = self.key(INVALIDATION_CHANNEL);
        self.bounded(async {
            let mut conn = self.conn().await?;
            let mut pipe = redis::pipe();
            for key in keys {
                pipe.publish(&channel, key).ignore();
            }
            let _: () = pipe.query_async(&mut conn).await?;
            tracing::debug!(keys = keys.len(), "published cache invalidation");
            Ok(())
        })
        .await
    }

    async fn invalidation_stream(&self) -> StoreResult<BoxStream<'static, String>> {
        let url = self
            .url
            .clone()
            .ok_or_else(|| StoreError::unavailable("redis store was built without a URL"))?;
        let channel = self.key(INVALIDATION_CHANNEL);
        self.bounded(async {
            let client = redis::Client::open(url)?;
            let mut pubsub = client.get_async_pubsub().await?;
            pubsub.subscribe(&channel).await?;
            tracing::info!(channel = %channel, "subscribed to cache invalidation channel");

            let stream = pubsub.into_on_message().filter_map(|msg| async move {
                match msg.get_payload::<String>() {
                    Ok(key) => Some(key),
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to parse invalidation message payload");
                        None
                    }
                }
            });
            Ok(stream.boxed())
        })
        .await
    }
}
