//! Integration tests for the Redis backend.
//!
//! These tests use testcontainers to spin up a real Redis instance and are
//! ignored by default because they need a Docker daemon:
//!
//! ```text
//! cargo test -p flowgate-store --test redis_store -- --ignored
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use flowgate_store::{
    KeyValueBackend, KeyedExpiringStore, RedisBackend, RedisConfig, StoreOptions,
    create_redis_pool,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

/// Get or create the shared Redis container
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

async fn backend() -> Arc<RedisBackend> {
    let config = RedisConfig {
        url: get_redis_url().await,
        pool_size: 5,
        timeout_ms: 5000,
    };
    Arc::new(RedisBackend::connect(&config).await.expect("connect"))
}

fn unique_prefix(tag: &str) -> String {
    format!("{tag}-{}:", std::process::id())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_round_trip_and_remove() {
    let store = KeyedExpiringStore::new(
        backend().await,
        StoreOptions::with_prefix(unique_prefix("rt")),
    );

    store.set("k", "").await.unwrap();
    assert_eq!(store.get("k").await.unwrap().as_deref(), Some(""));

    store.set("k", "a:b:c").await.unwrap();
    assert_eq!(store.remove("k").await.unwrap().as_deref(), Some("a:b:c"));
    assert_eq!(store.get("k").await.unwrap(), None);
    assert_eq!(store.remove("k").await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_ttl_expiry() {
    let store = KeyedExpiringStore::new(
        backend().await,
        StoreOptions::with_prefix(unique_prefix("ttl")).with_ttl(1),
    );

    store.set("k", "v").await.unwrap();
    assert!(store.exists("k").await.unwrap());

    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(store.get("k").await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_namespace_enumeration_and_flush() {
    let backend = backend().await;
    let a = KeyedExpiringStore::new(backend.clone(), StoreOptions::with_prefix(unique_prefix("A")));
    let b = KeyedExpiringStore::new(backend, StoreOptions::with_prefix(unique_prefix("B")));

    for key in ["a", "b", "c"] {
        a.set(key, "v").await.unwrap();
    }
    b.set("a", "other").await.unwrap();

    let expected: HashSet<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
    assert_eq!(a.list_keys().await.unwrap(), expected);

    assert_eq!(a.clear_namespace().await.unwrap(), 3);
    assert!(a.list_keys().await.unwrap().is_empty());
    assert_eq!(b.get("a").await.unwrap().as_deref(), Some("other"));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_take_is_atomic() {
    let backend = backend().await;
    assert!(backend.atomic_take());
    let store = KeyedExpiringStore::new(backend, StoreOptions::with_prefix(unique_prefix("race")));
    store.set("k", "v").await.unwrap();

    let (first, second) = tokio::join!(store.remove("k"), store.remove("k"));
    let winners = [first.unwrap(), second.unwrap()]
        .into_iter()
        .filter(Option::is_some)
        .count();
    assert_eq!(winners, 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_shared_pool_across_backends() {
    let config = RedisConfig {
        url: get_redis_url().await,
        ..RedisConfig::default()
    };
    let pool = create_redis_pool(&config).await.unwrap();
    let one = RedisBackend::new(pool.clone(), config.timeout());
    let two = RedisBackend::new(pool, config.timeout());

    one.set_with_ttl("pool-shared", "v", 60).await.unwrap();
    assert_eq!(two.get("pool-shared").await.unwrap().as_deref(), Some("v"));
    assert!(two.expire("pool-shared", 30).await.unwrap());
    assert!(!two.expire("pool-missing", 30).await.unwrap());
    assert_eq!(one.delete(&["pool-shared".to_string()]).await.unwrap(), 1);
}
