//! Statistics collection and export for pools and caches

use crossbeam::queue::ArrayQueue;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Number of acquire latency samples kept for the running average
pub const LATENCY_WINDOW: usize = 256;

/// Pool statistics snapshot
///
/// Counters are cumulative since construction. Gauges reflect the moment
/// the snapshot was taken; they are for observability only.
///
/// # Examples
///
/// ```
/// use resource_lifecycle::PoolStats;
///
/// let stats = PoolStats::default();
/// assert_eq!(stats.error_rate(), 0.0);
/// assert_eq!(stats.export()["total"], "0");
/// ```
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStats {
    /// Handles owned by the pool, including ones being created
    pub total: usize,

    /// Handles currently leased to callers
    pub active: usize,

    /// Handles sitting idle in the pool
    pub idle: usize,

    /// Callers blocked in `acquire`
    pub waiting: usize,

    pub min_size: usize,
    pub max_size: usize,

    /// Successful acquires
    pub acquired: u64,

    /// Leases returned by `release` or drop
    pub released: u64,

    /// Leases returned through `discard`
    pub discarded: u64,

    pub created: u64,
    pub destroyed: u64,

    /// Acquires that gave up after their timeout
    pub timeouts: u64,

    /// Factory failures, including circuit breaker rejections
    pub creation_failures: u64,

    /// Acquires rejected because the pool was closing
    pub rejected: u64,

    /// Releases of handles the pool no longer tracked
    pub ignored_releases: u64,

    /// Average acquire latency over the last [`LATENCY_WINDOW`] acquires
    pub average_acquire_latency: Duration,

    /// Leased handles over max size (0.0 to 1.0)
    pub utilization: f64,
}

impl PoolStats {
    /// Failed acquires over all acquire attempts
    pub fn error_rate(&self) -> f64 {
        let failures = self.timeouts + self.creation_failures;
        let attempts = self.acquired + failures;
        if attempts == 0 {
            0.0
        } else {
            failures as f64 / attempts as f64
        }
    }

    /// Export stats as a flat string map
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total".to_string(), self.total.to_string());
        metrics.insert("active".to_string(), self.active.to_string());
        metrics.insert("idle".to_string(), self.idle.to_string());
        metrics.insert("waiting".to_string(), self.waiting.to_string());
        metrics.insert("min_size".to_string(), self.min_size.to_string());
        metrics.insert("max_size".to_string(), self.max_size.to_string());
        metrics.insert("acquired".to_string(), self.acquired.to_string());
        metrics.insert("released".to_string(), self.released.to_string());
        metrics.insert("discarded".to_string(), self.discarded.to_string());
        metrics.insert("created".to_string(), self.created.to_string());
        metrics.insert("destroyed".to_string(), self.destroyed.to_string());
        metrics.insert("timeouts".to_string(), self.timeouts.to_string());
        metrics.insert("creation_failures".to_string(), self.creation_failures.to_string());
        metrics.insert("rejected".to_string(), self.rejected.to_string());
        metrics.insert("ignored_releases".to_string(), self.ignored_releases.to_string());
        metrics.insert(
            "average_acquire_latency_us".to_string(),
            self.average_acquire_latency.as_micros().to_string(),
        );
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics.insert("error_rate".to_string(), format!("{:.4}", self.error_rate()));
        metrics
    }

    /// Export stats in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use resource_lifecycle::PoolStats;
    ///
    /// let stats = PoolStats { active: 2, max_size: 4, ..PoolStats::default() };
    /// let output = stats.to_prometheus("orders_db").unwrap();
    /// assert!(output.contains("resource_pool_handles_active"));
    /// assert!(output.contains("pool=\"orders_db\""));
    /// ```
    #[cfg(feature = "metrics")]
    pub fn to_prometheus(&self, pool_name: &str) -> prometheus::Result<String> {
        let exposition = exposition::Exposition::new("resource_pool", "pool", pool_name);

        exposition.gauge("handles_total", "Handles owned by the pool", self.total as f64)?;
        exposition.gauge("handles_active", "Handles leased to callers", self.active as f64)?;
        exposition.gauge("handles_idle", "Idle handles", self.idle as f64)?;
        exposition.gauge("waiters", "Callers blocked in acquire", self.waiting as f64)?;
        exposition.gauge("utilization", "Leased handles over max size", self.utilization)?;
        exposition.gauge(
            "acquire_latency_seconds",
            "Average acquire latency",
            self.average_acquire_latency.as_secs_f64(),
        )?;

        exposition.counter("acquired_total", "Successful acquires", self.acquired)?;
        exposition.counter("released_total", "Released leases", self.released)?;
        exposition.counter("discarded_total", "Discarded leases", self.discarded)?;
        exposition.counter("created_total", "Handles created", self.created)?;
        exposition.counter("destroyed_total", "Handles destroyed", self.destroyed)?;
        exposition.counter("timeouts_total", "Acquire timeouts", self.timeouts)?;
        exposition.counter(
            "creation_failures_total",
            "Resource creation failures",
            self.creation_failures,
        )?;
        exposition.counter("rejected_total", "Acquires rejected during shutdown", self.rejected)?;

        exposition.encode()
    }
}

/// Cache statistics snapshot
///
/// # Examples
///
/// ```
/// use resource_lifecycle::CacheStats;
///
/// let mut stats = CacheStats::new();
/// stats.record_hit();
/// stats.record_miss();
/// assert_eq!(stats.hit_rate(), 0.5);
/// ```
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,

    /// Lookups that found nothing or an expired entry
    pub misses: u64,

    pub sets: u64,

    /// Deletes that removed an entry
    pub deletes: u64,

    /// Entries removed to make room under the eviction policy
    pub evictions: u64,

    /// Entries removed because their TTL elapsed
    pub expirations: u64,

    /// Entries currently stored, including expired ones not yet swept
    pub size: usize,

    pub capacity: usize,

    /// Serialized key and value bytes plus per-entry overhead
    pub memory_bytes: usize,

    /// Entries whose size could not be estimated (counted as overhead only)
    pub unsized_entries: usize,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns hits / (hits + misses), or 0.0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_set(&mut self) {
        self.sets += 1;
    }

    pub fn record_delete(&mut self) {
        self.deletes += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    pub fn record_expiration(&mut self) {
        self.expirations += 1;
    }

    /// Export stats as a flat string map
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("hits".to_string(), self.hits.to_string());
        metrics.insert("misses".to_string(), self.misses.to_string());
        metrics.insert("sets".to_string(), self.sets.to_string());
        metrics.insert("deletes".to_string(), self.deletes.to_string());
        metrics.insert("evictions".to_string(), self.evictions.to_string());
        metrics.insert("expirations".to_string(), self.expirations.to_string());
        metrics.insert("size".to_string(), self.size.to_string());
        metrics.insert("capacity".to_string(), self.capacity.to_string());
        metrics.insert("memory_bytes".to_string(), self.memory_bytes.to_string());
        metrics.insert("unsized_entries".to_string(), self.unsized_entries.to_string());
        metrics.insert("hit_rate".to_string(), format!("{:.4}", self.hit_rate()));
        metrics
    }

    /// Export stats in Prometheus exposition format
    #[cfg(feature = "metrics")]
    pub fn to_prometheus(&self, cache_name: &str) -> prometheus::Result<String> {
        let exposition = exposition::Exposition::new("cache", "cache", cache_name);

        exposition.gauge("entries", "Entries currently stored", self.size as f64)?;
        exposition.gauge("capacity", "Maximum entries", self.capacity as f64)?;
        exposition.gauge("memory_bytes", "Estimated memory footprint", self.memory_bytes as f64)?;
        exposition.gauge("hit_rate", "Hits over lookups", self.hit_rate())?;

        exposition.counter("hits_total", "Cache hits", self.hits)?;
        exposition.counter("misses_total", "Cache misses", self.misses)?;
        exposition.counter("sets_total", "Cache writes", self.sets)?;
        exposition.counter("deletes_total", "Explicit deletes", self.deletes)?;
        exposition.counter("evictions_total", "Capacity evictions", self.evictions)?;
        exposition.counter("expirations_total", "TTL expirations", self.expirations)?;

        exposition.encode()
    }
}

/// Fixed-capacity window of latency samples with a running sum.
///
/// Recording never allocates: once full, the oldest sample is dropped.
pub(crate) struct LatencyWindow {
    samples: ArrayQueue<u64>,
    sum_micros: AtomicU64,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: ArrayQueue::new(capacity.max(1)),
            sum_micros: AtomicU64::new(0),
        }
    }

    pub fn record(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros())
            .unwrap_or(u64::MAX)
            .min(u64::from(u32::MAX));
        self.sum_micros.fetch_add(micros, Ordering::Relaxed);
        if let Some(evicted) = self.samples.force_push(micros) {
            self.sum_micros.fetch_sub(evicted, Ordering::Relaxed);
        }
    }

    pub fn average(&self) -> Duration {
        let count = self.samples.len() as u64;
        if count == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.sum_micros.load(Ordering::Relaxed) / count)
    }
}

/// Point-in-time gauges read under the pool lock
pub(crate) struct PoolGauges {
    pub total: usize,
    pub active: usize,
    pub idle: usize,
    pub waiting: usize,
    pub min_size: usize,
    pub max_size: usize,
}

/// Internal pool counters
pub(crate) struct PoolMetricsTracker {
    pub acquired: AtomicU64,
    pub released: AtomicU64,
    pub discarded: AtomicU64,
    pub created: AtomicU64,
    pub destroyed: AtomicU64,
    pub timeouts: AtomicU64,
    pub creation_failures: AtomicU64,
    pub rejected: AtomicU64,
    pub ignored_releases: AtomicU64,
    latency: LatencyWindow,
}

impl PoolMetricsTracker {
    pub fn new() -> Self {
        Self {
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            created: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            creation_failures: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            ignored_releases: AtomicU64::new(0),
            latency: LatencyWindow::new(LATENCY_WINDOW),
        }
    }

    pub fn record_acquired(&self, elapsed: Duration) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        self.latency.record(elapsed);
    }

    pub fn snapshot(&self, gauges: PoolGauges) -> PoolStats {
        let utilization = if gauges.max_size > 0 {
            (gauges.active as f64 / gauges.max_size as f64).min(1.0)
        } else {
            0.0
        };

        PoolStats {
            total: gauges.total,
            active: gauges.active,
            idle: gauges.idle,
            waiting: gauges.waiting,
            min_size: gauges.min_size,
            max_size: gauges.max_size,
            acquired: self.acquired.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            creation_failures: self.creation_failures.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            ignored_releases: self.ignored_releases.load(Ordering::Relaxed),
            average_acquire_latency: self.latency.average(),
            utilization,
        }
    }
}

impl Default for PoolMetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "metrics")]
mod exposition {
    use prometheus::{Encoder, Gauge, IntCounter, Opts, Registry, TextEncoder};

    /// Private registry filled from one stats snapshot
    pub(super) struct Exposition {
        registry: Registry,
        namespace: &'static str,
        label: &'static str,
        instance: String,
    }

    impl Exposition {
        pub fn new(namespace: &'static str, label: &'static str, instance: &str) -> Self {
            Self {
                registry: Registry::new(),
                namespace,
                label,
                instance: instance.to_string(),
            }
        }

        pub fn gauge(&self, name: &str, help: &str, value: f64) -> prometheus::Result<()> {
            let gauge = Gauge::with_opts(self.opts(name, help))?;
            gauge.set(value);
            self.registry.register(Box::new(gauge))
        }

        pub fn counter(&self, name: &str, help: &str, value: u64) -> prometheus::Result<()> {
            let counter = IntCounter::with_opts(self.opts(name, help))?;
            counter.inc_by(value);
            self.registry.register(Box::new(counter))
        }

        pub fn encode(self) -> prometheus::Result<String> {
            let mut buffer = Vec::new();
            TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
            String::from_utf8(buffer).map_err(|err| prometheus::Error::Msg(err.to_string()))
        }

        fn opts(&self, name: &str, help: &str) -> Opts {
            Opts::new(name, help)
                .namespace(self.namespace)
                .const_label(self.label, self.instance.as_str())
        }
    }
}
