// Demo binary: runs a small simulated workload against a pool and a cache
// configured from the environment, then prints their stats.
// Run the library demos with: cargo run --example basic

use resource_lifecycle::{
    BoxError, Cache, CacheConfiguration, Pool, PoolConfiguration, factory_fn,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "resource_lifecycle=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let pool_config = PoolConfiguration::from_env()?;
    let cache_config = CacheConfiguration::from_env()?;
    info!(?pool_config, ?cache_config, "configuration loaded");

    let next_connection = Arc::new(AtomicU64::new(1));
    let pool = Pool::new(
        factory_fn(move || {
            let next_connection = Arc::clone(&next_connection);
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok::<_, BoxError>(next_connection.fetch_add(1, Ordering::Relaxed))
            }
        }),
        pool_config,
    )
    .await?;
    let cache: Cache<String, u64> = Cache::new(cache_config)?;

    let reaper = pool.spawn_maintenance();
    let sweeper = cache.spawn_maintenance();

    let mut workers = Vec::new();
    for worker in 0..8u64 {
        let pool = pool.clone();
        let cache = cache.clone();
        workers.push(tokio::spawn(async move {
            for request in 0..20u64 {
                let key = format!("tenant:{}", (worker * 7 + request) % 12);
                let connection = match pool.acquire_default().await {
                    Ok(lease) => lease,
                    Err(err) => {
                        tracing::warn!(worker, error = %err, "acquire failed");
                        continue;
                    }
                };
                cache.get_or_insert_with(key, || *connection);
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }));
    }
    for worker in workers {
        worker.await?;
    }

    println!("pool:  {}", serde_json::to_string_pretty(&pool.stats())?);
    println!("health: {}", serde_json::to_string_pretty(&pool.health_check())?);
    println!("cache: {}", serde_json::to_string_pretty(&cache.stats())?);

    reaper.stop().await;
    sweeper.stop().await;
    pool.close(Duration::from_secs(1)).await;
    Ok(())
}
