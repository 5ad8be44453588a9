use joule_cache::mem::MemCache;
use joule_core::cache::port::{Cache, CacheExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct TestItem {
    id: u32,
    name: String,
}

#[tokio::test]
async fn test_mem_cache_raw_ops() {
    let cache = MemCache::new();
    let key = "raw_key";
    let value = vec![1, 2, 3, 4];

    cache.set_raw(key, value.clone()).await.unwrap();
    let result = cache.get_raw(key).await.unwrap().unwrap();
    assert_eq!(result, value);

    cache.del(key).await.unwrap();
    assert!(cache.get_raw(key).await.unwrap().is_none());
}

#[tokio::test]
async fn test_mem_cache_typed_ops_with_ttl() {
    let cache = MemCache::new();
    let item = TestItem {
        id: 42,
        name: "Joule".to_string(),
    };

    cache
        .set_for("typed_key", &item, Duration::from_secs(300))
        .await
        .unwrap();
    let result: TestItem = cache.get("typed_key").await.unwrap().unwrap();
    assert_eq!(result, item);
}

#[tokio::test]
async fn test_mem_cache_entry_expires() {
    let cache = MemCache::new();
    cache
        .set_raw_for("short", vec![7], Duration::from_millis(20))
        .await
        .unwrap();
    assert!(cache.get_raw("short").await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(cache.get_raw("short").await.unwrap().is_none());
    assert!(cache.is_empty(), "过期条目应在读取时被清除");
}
