//! Basic usage examples for the pool and the cache

use resource_lifecycle::{
    BoxError, Cache, CacheConfiguration, EvictionPolicy, Pool, PoolConfiguration, PoolError,
    factory_fn,
};
use std::time::Duration;

#[tokio::main]
async fn main() {
    println!("=== resource_lifecycle - Basic Examples ===\n");

    // Example 1: Lease and return
    simple_pool().await;

    // Example 2: Exhaustion and timeouts
    bounded_pool().await;

    // Example 3: Cache eviction policies
    eviction_policies();

    // Example 4: Stats and health
    stats_and_health().await;
}

fn connections() -> impl resource_lifecycle::ResourceFactory<Resource = String> {
    factory_fn(|| async { Ok::<_, BoxError>("postgres://crm".to_string()) })
}

async fn simple_pool() {
    println!("1. Simple Pool:");
    let pool = Pool::new(connections(), PoolConfiguration::new().with_min_size(2))
        .await
        .unwrap();

    {
        let conn = pool.acquire(Duration::from_secs(1)).await.unwrap();
        println!("   Got {} ({})", conn.id(), *conn);
        println!("   Active: {}", pool.stats().active);
        // Returned automatically when dropped
    }

    println!("   Idle after return: {}\n", pool.stats().idle);
}

async fn bounded_pool() {
    println!("2. Bounded Pool:");
    let pool = Pool::new(
        connections(),
        PoolConfiguration::new().with_min_size(1).with_max_size(2),
    )
    .await
    .unwrap();

    let first = pool.acquire(Duration::from_millis(10)).await.unwrap();
    let _second = pool.acquire(Duration::from_millis(10)).await.unwrap();

    match pool.acquire(Duration::from_millis(10)).await {
        Err(PoolError::AcquireTimeout(timeout)) => {
            println!("   Third acquire timed out after {timeout:?}")
        }
        other => println!("   Unexpected: {:?}", other.map(|lease| lease.id())),
    }

    pool.release(first);
    let retried = pool.acquire(Duration::from_millis(10)).await.unwrap();
    println!("   Retry after release got {}\n", retried.id());
}

fn eviction_policies() {
    println!("3. Eviction Policies:");

    for policy in [EvictionPolicy::Lru, EvictionPolicy::Lfu, EvictionPolicy::Fifo] {
        let cache = Cache::new(
            CacheConfiguration::new()
                .with_max_entries(2)
                .with_eviction_policy(policy),
        )
        .unwrap();

        cache.set("a".to_string(), 1);
        cache.set("b".to_string(), 2);
        cache.get("a");
        cache.get("a");
        cache.get("b");
        cache.set("c".to_string(), 3);

        let mut keys: Vec<String> = cache.keys().collect();
        keys.sort();
        println!("   {policy}: kept {keys:?}");
    }
    println!();
}

async fn stats_and_health() {
    println!("4. Stats and Health:");
    let pool = Pool::new(connections(), PoolConfiguration::new().with_min_size(1))
        .await
        .unwrap();

    for _ in 0..5 {
        let _conn = pool.acquire_default().await.unwrap();
    }

    let stats = pool.stats();
    println!("   Acquired: {}", stats.acquired);
    println!("   Created: {}", stats.created);
    println!("   Health: {:?}", pool.health_check().status);

    let cache: Cache<String, u32> = Cache::new(CacheConfiguration::new()).unwrap();
    cache.set("deal:1".to_string(), 100);
    cache.get("deal:1");
    cache.get("deal:2");
    println!("   Cache hit rate: {:.2}", cache.stats().hit_rate());
    println!("   Cache memory estimate: {} bytes", cache.stats().memory_bytes);
}
