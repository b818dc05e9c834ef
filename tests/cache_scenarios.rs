use resource_lifecycle::{Cache, CacheConfiguration, EvictionPolicy};
use std::collections::HashMap;
use std::time::Duration;

fn cache_with(max_entries: usize, policy: EvictionPolicy) -> Cache<String, String> {
    Cache::new(
        CacheConfiguration::new()
            .with_max_entries(max_entries)
            .with_eviction_policy(policy)
            .with_ttl(Duration::from_secs(300)),
    )
    .unwrap()
}

fn set(cache: &Cache<String, String>, key: &str, value: &str) {
    cache.set(key.to_string(), value.to_string());
}

#[test]
fn test_lru_evicts_least_recently_touched() {
    let cache = cache_with(3, EvictionPolicy::Lru);
    set(&cache, "a", "1");
    set(&cache, "b", "2");
    set(&cache, "c", "3");

    cache.get("a");
    cache.get("b");
    set(&cache, "d", "4");

    assert!(!cache.has("c"));
    assert!(cache.has("a"));
    assert!(cache.has("b"));
    assert!(cache.has("d"));
    assert_eq!(cache.stats().evictions, 1);
}

#[test]
fn test_fifo_evicts_by_insertion_order() {
    let cache = cache_with(2, EvictionPolicy::Fifo);
    set(&cache, "a", "1");
    set(&cache, "b", "2");
    for _ in 0..5 {
        cache.get("a");
    }
    set(&cache, "c", "3");

    assert!(!cache.has("a"));
    assert!(cache.has("b"));
    assert!(cache.has("c"));
}

#[test]
fn test_lfu_evicts_least_frequently_read() {
    let cache = cache_with(2, EvictionPolicy::Lfu);
    set(&cache, "A", "1");
    set(&cache, "B", "2");
    for _ in 0..3 {
        assert_eq!(cache.get("A"), Some("1".to_string()));
    }
    assert_eq!(cache.get("B"), Some("2".to_string()));

    set(&cache, "C", "3");

    assert!(!cache.has("B"));
    assert!(cache.has("A"));
    assert!(cache.has("C"));
}

#[test]
fn test_lfu_tie_breaks_on_oldest_access() {
    let cache = cache_with(2, EvictionPolicy::Lfu);
    set(&cache, "a", "1");
    set(&cache, "b", "2");
    cache.get("b");
    cache.get("a");

    set(&cache, "c", "3");
    assert!(!cache.has("b"));
}

#[tokio::test(start_paused = true)]
async fn test_ttl_expiry_on_read() {
    let cache: Cache<String, String> = Cache::new(
        CacheConfiguration::new().with_ttl(Duration::from_millis(100)),
    )
    .unwrap();
    set(&cache, "k", "v");
    assert_eq!(cache.get("k"), Some("v".to_string()));

    tokio::time::advance(Duration::from_millis(101)).await;
    assert!(!cache.has("k"));
    assert_eq!(cache.get("k"), None);

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.expirations, 1);
    assert_eq!(stats.size, 0);
}

#[tokio::test(start_paused = true)]
async fn test_entry_is_live_at_exactly_ttl() {
    let cache: Cache<String, u32> =
        Cache::new(CacheConfiguration::new().with_ttl(Duration::from_secs(10))).unwrap();
    cache.set("k".to_string(), 1);

    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.purge_expired(), 0);
    assert_eq!(cache.get("k"), Some(1));

    tokio::time::advance(Duration::from_millis(1)).await;
    assert_eq!(cache.get("k"), None);
    assert_eq!(cache.stats().expirations, 1);
}

#[tokio::test(start_paused = true)]
async fn test_overwrite_restarts_ttl() {
    let cache: Cache<String, String> = Cache::new(
        CacheConfiguration::new().with_ttl(Duration::from_millis(100)),
    )
    .unwrap();
    set(&cache, "k", "v1");
    tokio::time::advance(Duration::from_millis(80)).await;
    set(&cache, "k", "v2");
    tokio::time::advance(Duration::from_millis(80)).await;

    assert_eq!(cache.get("k"), Some("v2".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_background_sweep_removes_expired_entries() {
    let cache: Cache<String, String> = Cache::new(
        CacheConfiguration::new()
            .with_ttl(Duration::from_millis(50))
            .with_sweep_interval(Duration::from_millis(100)),
    )
    .unwrap();
    for i in 0..500 {
        cache.set(format!("session:{i}"), "token".to_string());
    }

    let sweeper = cache.spawn_maintenance();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let stats = cache.stats();
    assert_eq!(stats.size, 0);
    assert_eq!(stats.expirations, 500);
    assert_eq!(stats.memory_bytes, 0);
    // Sweeping is not a lookup
    assert_eq!(stats.misses, 0);

    sweeper.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_exits_with_cache() {
    let cache: Cache<String, String> = Cache::new(
        CacheConfiguration::new().with_sweep_interval(Duration::from_millis(10)),
    )
    .unwrap();
    let sweeper = cache.spawn_maintenance();
    drop(cache);

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(sweeper.is_finished());
}

#[test]
fn test_hit_rate_and_counters() {
    let cache = cache_with(10, EvictionPolicy::Lru);
    set(&cache, "a", "1");
    cache.get("a");
    cache.get("a");
    cache.get("a");
    cache.get("missing");
    cache.delete("a");
    cache.delete("a");

    let stats = cache.stats();
    assert_eq!(stats.hits, 3);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.sets, 1);
    assert_eq!(stats.deletes, 1);
    assert_eq!(stats.hit_rate(), 0.75);
    assert_eq!(stats.export()["hit_rate"], "0.7500");
}

#[test]
fn test_unserializable_value_degrades_memory_estimate() {
    // JSON maps need string keys, so this value cannot be serialized
    let cache: Cache<String, HashMap<(u8, u8), u8>> =
        Cache::new(CacheConfiguration::new().with_entry_overhead(32)).unwrap();
    let mut grid = HashMap::new();
    grid.insert((0, 0), 1);

    cache.set("grid".to_string(), grid.clone());
    assert_eq!(cache.get("grid"), Some(grid));

    let stats = cache.stats();
    assert_eq!(stats.size, 1);
    assert_eq!(stats.memory_bytes, 32);
    assert_eq!(stats.unsized_entries, 1);

    cache.delete("grid");
    assert_eq!(cache.stats().unsized_entries, 0);
}

#[test]
fn test_keys_snapshot_is_independent() {
    let cache = cache_with(10, EvictionPolicy::Lru);
    set(&cache, "a", "1");
    set(&cache, "b", "2");

    let keys = cache.keys();
    cache.clear();

    let mut keys: Vec<String> = keys.collect();
    keys.sort();
    assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    assert!(cache.is_empty());
}

#[test]
fn test_shared_across_threads() {
    let cache = cache_with(64, EvictionPolicy::Lru);
    let handles: Vec<_> = (0..4)
        .map(|thread| {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for i in 0..100 {
                    let key = format!("{thread}:{}", i % 20);
                    cache.set(key.clone(), i.to_string());
                    cache.get(&key);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = cache.stats();
    assert_eq!(stats.sets, 400);
    assert_eq!(stats.hits + stats.misses, 400);
    assert!(cache.len() <= 64);
}
