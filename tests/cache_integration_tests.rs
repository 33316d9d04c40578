//! Integration tests for the cache tiers
//!
//! These tests verify the shared and session tiers on their own:
//! - Basic cache operations
//! - TTL expiration and negative caching
//! - Capacity eviction
//! - Cleanup sweep, manual and background
//! - Concurrent access

use doc_cache::cache::{
    start_auto_cleanup, CacheEntry, CacheKey, EntityFields, InvalidationReason, SessionCache,
    SharedCache, SharedCacheConfig,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn key(id: &str) -> CacheKey {
    CacheKey::new("cars", id).unwrap()
}

fn car(make: &str) -> CacheEntry {
    let mut fields = EntityFields::new();
    fields.insert("make".to_string(), json!(make));
    CacheEntry::Entity(fields)
}

#[tokio::test]
async fn test_basic_cache_operations() {
    let config = SharedCacheConfig::builder()
        .default_ttl(Duration::from_secs(60))
        .max_entries(100)
        .enable_metrics(true)
        .build();

    let cache = SharedCache::try_new(config).unwrap();

    // Test set and get
    cache.set(key("MyCar"), car("Toyota"));

    let entry = cache.get(&key("MyCar")).unwrap();
    assert_eq!(entry.field("make"), Some(&json!("Toyota")));

    // Test cache hit tracking
    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 0);

    // Unknown key is a miss, not an absence
    assert!(cache.get(&key("Other")).unwrap_err().is_miss());
    assert_eq!(cache.stats().misses, 1);
}

#[tokio::test]
async fn test_ttl_expiration() {
    let config = SharedCacheConfig::builder()
        .default_ttl(Duration::from_millis(100))
        .ttl_jitter(0.0) // No jitter for predictable tests
        .build();

    let cache = SharedCache::new(config);

    cache.set(key("expiring"), car("Toyota"));

    // Should be available immediately
    assert!(cache.get(&key("expiring")).is_ok());

    // Wait for expiration
    tokio::time::sleep(Duration::from_millis(150)).await;

    // Should be expired now
    assert!(cache.get(&key("expiring")).unwrap_err().is_miss());

    let stats = cache.stats();
    assert!(stats.evictions_ttl > 0);
    assert_eq!(stats.entries, 0);
}

#[tokio::test]
async fn test_negative_entry_expires() {
    let config = SharedCacheConfig::builder()
        .default_ttl(Duration::from_millis(100))
        .build();

    let cache = SharedCache::new(config);
    cache.set_nil(key("Ghost"));

    // Known-missing until the TTL runs out
    assert!(cache.get(&key("Ghost")).unwrap().is_absent());
    assert_eq!(cache.stats().negative_hits, 1);

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(cache.get(&key("Ghost")).unwrap_err().is_miss());
}

#[tokio::test]
async fn test_capacity_eviction() {
    let config = SharedCacheConfig::builder()
        .default_ttl(Duration::from_secs(300))
        .max_entries(3)
        .build();

    let cache = SharedCache::new(config);

    // Fill cache to capacity; key2 expires first
    cache.set_with_ttl(key("key1"), car("a"), Duration::from_secs(300));
    cache.set_with_ttl(key("key2"), car("b"), Duration::from_secs(10));
    cache.set_with_ttl(key("key3"), car("c"), Duration::from_secs(200));

    // Overwriting an existing key never evicts
    cache.set_with_ttl(key("key3"), car("d"), Duration::from_secs(200));
    assert_eq!(cache.len(), 3);

    // New key evicts the entry closest to expiry
    cache.set(key("key4"), car("e"));

    assert!(cache.get(&key("key2")).unwrap_err().is_miss());
    assert!(cache.get(&key("key1")).is_ok());
    assert_eq!(cache.get(&key("key3")).unwrap().field("make"), Some(&json!("d")));
    assert!(cache.get(&key("key4")).is_ok());
    assert_eq!(cache.stats().evictions_capacity, 1);
}

#[tokio::test]
async fn test_cleanup_expired() {
    let config = SharedCacheConfig::builder()
        .default_ttl(Duration::from_millis(50))
        .cleanup_interval(Duration::from_millis(10))
        .ttl_jitter(0.0)
        .enable_auto_cleanup(false)
        .build();

    let cache = SharedCache::new(config);

    // Insert multiple entries
    cache.set(key("k1"), car("a"));
    cache.set(key("k2"), car("b"));
    cache.set_nil(key("k3"));

    // Nothing is sweepable yet
    assert!(cache.cleanup_expired().is_empty());

    // Wait past expiry plus the sweep grace
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Run cleanup
    let events = cache.cleanup_expired();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason, InvalidationReason::Swept);
    assert_eq!(events[0].keys.len(), 3);

    // Cache should be empty
    assert_eq!(cache.len(), 0);
    assert_eq!(cache.stats().evictions_sweep, 3);
}

#[tokio::test]
async fn test_background_sweeper() {
    let config = SharedCacheConfig::builder()
        .default_ttl(Duration::from_millis(20))
        .cleanup_interval(Duration::from_millis(20))
        .enable_auto_cleanup(true)
        .build();

    let cache = Arc::new(SharedCache::try_new(config).unwrap());
    let sweeper = start_auto_cleanup(&cache).expect("auto cleanup enabled");

    cache.set(key("k1"), car("a"));
    cache.set(key("k2"), car("b"));

    // Nobody reads these again; only the sweeper can remove them
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(cache.is_empty());

    sweeper.shutdown().await;
}

#[tokio::test]
async fn test_sweeper_disabled() {
    let config = SharedCacheConfig::builder().enable_auto_cleanup(false).build();
    let cache = Arc::new(SharedCache::new(config));

    assert!(start_auto_cleanup(&cache).is_none());
}

#[tokio::test]
async fn test_sweeper_stops_with_cache() {
    let config = SharedCacheConfig::builder()
        .cleanup_interval(Duration::from_millis(10))
        .build();

    let cache = Arc::new(SharedCache::new(config));
    let sweeper = cache.spawn_sweeper();
    drop(cache);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(sweeper.is_finished());
}

#[tokio::test]
async fn test_clear() {
    let cache = SharedCache::new(SharedCacheConfig::default());

    cache.set(key("k1"), car("a"));
    cache.set_nil(key("k2"));

    let event = cache.clear();
    assert_eq!(event.reason, InvalidationReason::Cleared);
    assert_eq!(event.keys.len(), 2);
    assert!(cache.is_empty());
    assert_eq!(cache.stats().invalidations, 2);
}

#[tokio::test]
async fn test_cache_stats() {
    let config = SharedCacheConfig::builder().enable_metrics(true).build();

    let cache = SharedCache::new(config);

    // Generate some cache activity
    cache.set(key("k1"), car("a"));
    cache.set_nil(key("k2"));

    cache.get(&key("k1")).unwrap(); // Hit
    cache.get(&key("k1")).unwrap(); // Hit
    cache.get(&key("k2")).unwrap(); // Negative hit
    let _ = cache.get(&key("k3")); // Miss

    let stats = cache.stats();
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.negative_hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.entries, 2);
    assert!(stats.hit_rate() > 0.0);
}

#[tokio::test]
async fn test_metrics_disabled() {
    let config = SharedCacheConfig::builder().enable_metrics(false).build();

    let cache = SharedCache::new(config);
    cache.set(key("k1"), car("a"));
    cache.get(&key("k1")).unwrap();
    let _ = cache.get(&key("k2"));

    let stats = cache.stats();
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.misses, 0);
    assert_eq!(stats.entries, 1);
}

#[tokio::test]
async fn test_session_cache_is_private() {
    let first = SessionCache::new();
    let second = SessionCache::new();

    first.set(key("MyCar"), car("Toyota"));
    first.delete(key("Gone"));

    assert!(first.get(&key("MyCar")).is_ok());
    assert!(first.get(&key("Gone")).unwrap().is_absent());
    assert!(second.get(&key("MyCar")).unwrap_err().is_miss());
    assert_ne!(first.id(), second.id());
}

#[tokio::test]
async fn test_concurrent_cache_access() {
    use tokio::task;

    let config = SharedCacheConfig::builder()
        .default_ttl(Duration::from_secs(60))
        .max_entries(1000)
        .build();

    let cache = Arc::new(SharedCache::new(config));

    // Spawn multiple concurrent tasks
    let mut handles = vec![];

    for i in 0..10 {
        let cache_clone = cache.clone();
        let handle = task::spawn(async move {
            for j in 0..10 {
                let id = format!("car_{}_{}", i, j);
                let make = format!("make_{}_{}", i, j);
                cache_clone.set(key(&id), car(&make));
                let retrieved = cache_clone.get(&key(&id)).unwrap();
                assert_eq!(retrieved.field("make"), Some(&json!(make)));
            }
        });
        handles.push(handle);
    }

    // Wait for all tasks
    for handle in handles {
        handle.await.unwrap();
    }

    // Verify all entries were inserted
    let stats = cache.stats();
    assert_eq!(stats.entries, 100);
    assert_eq!(stats.hits, 100);
}

#[tokio::test]
async fn test_concurrent_writers_same_key() {
    let cache = Arc::new(SharedCache::new(SharedCacheConfig::default()));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let cache = cache.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    cache.set(key("hot"), car(&format!("writer_{}", i)));
                    let _ = cache.get(&key("hot"));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    // Last writer wins; the slot is never torn
    assert_eq!(cache.len(), 1);
    let make = cache.get(&key("hot")).unwrap().field("make").cloned().unwrap();
    assert!(make.as_str().unwrap().starts_with("writer_"));
}

#[tokio::test]
async fn test_preset_configurations() {
    // Test short-lived config
    let short = SharedCache::try_new(SharedCacheConfig::short_lived()).unwrap();
    assert_eq!(short.len(), 0);

    // Test long-lived config
    let long = SharedCache::try_new(SharedCacheConfig::long_lived()).unwrap();
    assert_eq!(long.len(), 0);

    // Invalid config is rejected
    let invalid = SharedCacheConfig::builder().max_entries(0).build();
    assert!(SharedCache::try_new(invalid).is_err());
}
