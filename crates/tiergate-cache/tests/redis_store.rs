//! Integration tests against a real Redis.
//!
//! Tests use testcontainers to spin up a shared Redis instance and are
//! ignored by default; run them with `cargo test -- --ignored`.

use std::sync::Arc;
use std::time::Duration;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tiergate_cache::{
    CacheSettings, InvalidationListener, RedisStore, SharedStore, TieredCache, now_millis,
};
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");

            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let url = format!("redis://127.0.0.1:{}", host_port);

            (container, url)
        })
        .await;

    url.clone()
}

/// Each test gets its own prefix so `flush` in one test cannot wipe another.
async fn store(prefix: &str) -> RedisStore {
    RedisStore::connect(
        &get_redis_url().await,
        4,
        Duration::from_secs(5),
        format!("test:{prefix}:"),
    )
    .await
    .expect("connect to redis")
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_bytes_and_expiry() {
    let store = store("bytes").await;
    store.set("k", b"v", Duration::from_millis(300)).await.unwrap();
    assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
    assert!(store.exists("k").await.unwrap());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(store.get("k").await.unwrap(), None);
    assert_eq!(store.delete(&["k".to_string()]).await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_sets_and_lists() {
    let store = store("collections").await;
    let ttl = Duration::from_secs(60);
    store.set_add("tag:t", "a", ttl).await.unwrap();
    store.set_add("tag:t", "b", ttl).await.unwrap();
    store.set_add("tag:t", "a", ttl).await.unwrap();
    let mut members = store.set_members("tag:t").await.unwrap();
    members.sort();
    assert_eq!(members, vec!["a".to_string(), "b".to_string()]);

    for i in 0..5u8 {
        store.list_push("log", &[i], 3, None).await.unwrap();
    }
    assert_eq!(
        store.list_range("log").await.unwrap(),
        vec![vec![4u8], vec![3u8], vec![2u8]]
    );
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_sliding_window_script() {
    let store = store("window").await;
    let window = Duration::from_secs(60);
    let ttl = Duration::from_secs(120);
    let now = now_millis();

    for i in 0..3 {
        let snapshot = store
            .sliding_window("rl:x", now + i, window, 3, ttl)
            .await
            .unwrap();
        assert!(snapshot.admitted);
        assert_eq!(snapshot.count, i);
        assert_eq!(snapshot.oldest_ms, Some(now));
    }
    let denied = store
        .sliding_window("rl:x", now + 10, window, 3, ttl)
        .await
        .unwrap();
    assert!(!denied.admitted);
    assert_eq!(denied.count, 3);

    // The first stamp is exactly one window old and still counts.
    let boundary = store
        .sliding_window("rl:x", now + 60_000, window, 3, ttl)
        .await
        .unwrap();
    assert!(!boundary.admitted);
    assert_eq!(boundary.count, 3);

    // Once the window has moved past the first three, admission resumes.
    let later = store
        .sliding_window("rl:x", now + 60_005, window, 3, ttl)
        .await
        .unwrap();
    assert!(later.admitted);
    assert_eq!(later.count, 0);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_flush_only_touches_own_prefix() {
    let mine = store("flush-a").await;
    let other = store("flush-b").await;
    mine.set("k", b"1", Duration::from_secs(60)).await.unwrap();
    other.set("k", b"2", Duration::from_secs(60)).await.unwrap();

    mine.flush().await.unwrap();
    assert_eq!(mine.get("k").await.unwrap(), None);
    assert_eq!(other.get("k").await.unwrap(), Some(b"2".to_vec()));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_tiered_cache_promotion_across_instances() {
    let shared = store("promotion").await;
    let cache1 = TieredCache::new(CacheSettings::default(), Some(Arc::new(shared.clone())));
    let cache2 = TieredCache::new(CacheSettings::default(), Some(Arc::new(shared)));

    cache1
        .set("report", &vec![1u32, 2, 3], Duration::from_secs(60), &["reports"])
        .await
        .unwrap();

    assert_eq!(cache2.get::<Vec<u32>>("report").await, Some(vec![1, 2, 3]));
    assert_eq!(cache2.stats().shared_hits, 1);
    assert_eq!(cache2.get::<Vec<u32>>("report").await, Some(vec![1, 2, 3]));
    assert_eq!(cache2.stats().local_hits, 1);

    assert_eq!(cache1.invalidate_by_tag("reports").await, 1);
    assert_eq!(cache1.get::<Vec<u32>>("report").await, None);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_pubsub_invalidation_reaches_peer() {
    let shared = store("pubsub").await;
    let writer = TieredCache::new(CacheSettings::default(), Some(Arc::new(shared.clone())));
    let reader = Arc::new(TieredCache::new(
        CacheSettings::default(),
        Some(Arc::new(shared)),
    ));
    let listener = InvalidationListener::new(&reader).start().unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    writer.set("k", "v", Duration::from_secs(60), &[]).await.unwrap();
    assert!(reader.get::<String>("k").await.is_some());

    writer.delete("k").await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(reader.get::<String>("k").await, None);
    listener.abort();
}

#[tokio::test]
async fn test_connect_fails_fast_on_unreachable_url() {
    let result = RedisStore::connect(
        "redis://127.0.0.1:1",
        1,
        Duration::from_millis(500),
        "test:",
    )
    .await;
    assert!(result.is_err());
}
