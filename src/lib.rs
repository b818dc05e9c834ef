//! # resource_lifecycle
//!
//! Lifecycle management for shared resources under concurrency and capacity
//! limits: a bounded resource pool and a bounded eviction cache, each with
//! its own background maintenance task.
//!
//! ## Features
//!
//! - Bounded pool that grows lazily to `max_size` and reaps idle handles
//!   down to `min_size`
//! - FIFO waiter queue with direct handoff on release, no polling
//! - RAII leases that return to the pool on drop
//! - Graceful shutdown with a grace period for outstanding leases
//! - Cache with LRU, LFU and FIFO eviction and TTL expiry
//! - O(log n) victim selection through ordered indexes
//! - Health classification, stats snapshots and Prometheus export
//! - Circuit breaker around resource creation
//!
//! ## Quick Start
//!
//! ```rust
//! use resource_lifecycle::{factory_fn, BoxError, Cache, CacheConfiguration, Pool, PoolConfiguration};
//! use std::time::Duration;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let pool = Pool::new(
//!     factory_fn(|| async { Ok::<_, BoxError>(String::from("connection")) }),
//!     PoolConfiguration::new().with_min_size(1).with_max_size(4),
//! )
//! .await
//! .unwrap();
//!
//! {
//!     let conn = pool.acquire(Duration::from_secs(1)).await.unwrap();
//!     assert_eq!(conn.as_str(), "connection");
//!     // Returned to the pool when `conn` goes out of scope
//! }
//!
//! let cache = Cache::new(CacheConfiguration::new()).unwrap();
//! cache.set("tenant:42".to_string(), 7u64);
//! assert_eq!(cache.get("tenant:42"), Some(7));
//! # });
//! ```

mod cache;
mod circuit_breaker;
mod config;
mod errors;
mod eviction;
mod health;
mod maintenance;
mod metrics;
mod pool;

pub use cache::{Cache, EntryInfo};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerState};
pub use config::{
    CacheConfigUpdate, CacheConfiguration, CircuitBreakerSettings, IdleStrategy,
    PoolConfigUpdate, PoolConfiguration,
};
pub use errors::{BoxError, ConfigError, PoolError, PoolResult};
pub use eviction::EvictionPolicy;
pub use health::{HealthReport, HealthStatus, HealthThresholds};
pub use maintenance::MaintenanceHandle;
pub use metrics::{CacheStats, LATENCY_WINDOW, PoolStats};
pub use pool::{FnFactory, HandleId, HandleInfo, Lease, Pool, ResourceFactory, factory_fn};
