//! Pool and cache configuration options

use crate::errors::ConfigError;
use crate::eviction::EvictionPolicy;
use crate::health::HealthThresholds;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Order in which idle handles are reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdleStrategy {
    /// Reuse the handle that has been idle the longest
    Fifo,

    /// Reuse the most recently released handle, letting cold ones age out
    #[default]
    Lifo,
}

/// Circuit breaker guarding resource creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerSettings {
    /// Consecutive creation failures before the breaker opens
    pub threshold: usize,

    /// How long the breaker stays open before probing again
    pub reset_timeout: Duration,
}

/// Configuration for resource pool behavior
///
/// # Examples
///
/// ```
/// use resource_lifecycle::PoolConfiguration;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new()
///     .with_min_size(2)
///     .with_max_size(20)
///     .with_acquire_timeout(Duration::from_secs(2))
///     .with_idle_timeout(Duration::from_secs(60));
///
/// assert_eq!(config.max_size, 20);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfiguration {
    /// Handles kept alive even when idle
    pub min_size: usize,

    /// Upper bound on handles owned by the pool
    pub max_size: usize,

    /// Timeout used by `acquire_default`
    pub acquire_timeout: Duration,

    /// Idle time after which a handle above the floor is reaped
    pub idle_timeout: Duration,

    /// Interval between maintenance sweeps
    pub reap_interval: Duration,

    /// Create `min_size` handles during construction
    pub warmup: bool,

    /// Top the pool back up to `min_size` during maintenance
    pub replenish: bool,

    pub idle_strategy: IdleStrategy,

    /// Handles older than this are destroyed instead of reused
    pub max_lifetime: Option<Duration>,

    pub health_thresholds: HealthThresholds,

    pub circuit_breaker: Option<CircuitBreakerSettings>,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            min_size: 2,
            max_size: 10,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),
            reap_interval: Duration::from_secs(30),
            warmup: true,
            replenish: true,
            idle_strategy: IdleStrategy::Lifo,
            max_lifetime: None,
            health_thresholds: HealthThresholds::default(),
            circuit_breaker: None,
        }
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load overrides from the environment on top of the defaults
    ///
    /// Reads `POOL_MIN_SIZE`, `POOL_MAX_SIZE`, `POOL_ACQUIRE_TIMEOUT_MS`,
    /// `POOL_IDLE_TIMEOUT_MS` and `POOL_REAP_INTERVAL_MS`. Unset variables
    /// keep their default; unparseable ones are an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(min) = env_parse("POOL_MIN_SIZE")? {
            config.min_size = min;
        }
        if let Some(max) = env_parse("POOL_MAX_SIZE")? {
            config.max_size = max;
        }
        if let Some(ms) = env_parse("POOL_ACQUIRE_TIMEOUT_MS")? {
            config.acquire_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse("POOL_IDLE_TIMEOUT_MS")? {
            config.idle_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse("POOL_REAP_INTERVAL_MS")? {
            config.reap_interval = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_min_size(mut self, size: usize) -> Self {
        self.min_size = size;
        self
    }

    /// Set the maximum pool size
    ///
    /// # Examples
    ///
    /// ```
    /// use resource_lifecycle::PoolConfiguration;
    ///
    /// let config = PoolConfiguration::new().with_max_size(50);
    /// assert_eq!(config.max_size, 50);
    /// ```
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    pub fn with_warmup(mut self, warmup: bool) -> Self {
        self.warmup = warmup;
        self
    }

    pub fn with_replenish(mut self, replenish: bool) -> Self {
        self.replenish = replenish;
        self
    }

    pub fn with_idle_strategy(mut self, strategy: IdleStrategy) -> Self {
        self.idle_strategy = strategy;
        self
    }

    /// Destroy handles once they are older than `lifetime`
    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = Some(lifetime);
        self
    }

    pub fn with_health_thresholds(mut self, thresholds: HealthThresholds) -> Self {
        self.health_thresholds = thresholds;
        self
    }

    /// Enable the circuit breaker around resource creation
    ///
    /// # Examples
    ///
    /// ```
    /// use resource_lifecycle::PoolConfiguration;
    /// use std::time::Duration;
    ///
    /// let config = PoolConfiguration::new()
    ///     .with_circuit_breaker(5, Duration::from_secs(60));
    ///
    /// assert_eq!(config.circuit_breaker.unwrap().threshold, 5);
    /// ```
    pub fn with_circuit_breaker(mut self, threshold: usize, reset_timeout: Duration) -> Self {
        self.circuit_breaker = Some(CircuitBreakerSettings {
            threshold,
            reset_timeout,
        });
        self
    }

    /// Check the sizing constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::ZeroMaxSize);
        }
        if self.min_size > self.max_size {
            return Err(ConfigError::MinExceedsMax {
                min: self.min_size,
                max: self.max_size,
            });
        }
        if self.reap_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("reap_interval"));
        }
        Ok(())
    }

    /// Return a copy with the update's fields applied
    pub fn apply(&self, update: &PoolConfigUpdate) -> PoolConfiguration {
        let mut next = self.clone();
        if let Some(min) = update.min_size {
            next.min_size = min;
        }
        if let Some(max) = update.max_size {
            next.max_size = max;
        }
        if let Some(timeout) = update.acquire_timeout {
            next.acquire_timeout = timeout;
        }
        if let Some(timeout) = update.idle_timeout {
            next.idle_timeout = timeout;
        }
        if let Some(interval) = update.reap_interval {
            next.reap_interval = interval;
        }
        if let Some(lifetime) = update.max_lifetime {
            next.max_lifetime = lifetime;
        }
        if let Some(thresholds) = update.health_thresholds {
            next.health_thresholds = thresholds;
        }
        next
    }
}

/// Partial pool configuration update; `None` fields are left unchanged
///
/// `max_lifetime` is doubly optional so it can be cleared with `Some(None)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolConfigUpdate {
    pub min_size: Option<usize>,
    pub max_size: Option<usize>,
    pub acquire_timeout: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    pub reap_interval: Option<Duration>,
    pub max_lifetime: Option<Option<Duration>>,
    pub health_thresholds: Option<HealthThresholds>,
}

/// Configuration for cache behavior
///
/// # Examples
///
/// ```
/// use resource_lifecycle::{CacheConfiguration, EvictionPolicy};
/// use std::time::Duration;
///
/// let config = CacheConfiguration::new()
///     .with_ttl(Duration::from_secs(60))
///     .with_max_entries(500)
///     .with_eviction_policy(EvictionPolicy::Lfu);
///
/// assert_eq!(config.eviction_policy, EvictionPolicy::Lfu);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfiguration {
    /// Lifetime of an entry from its last write
    pub ttl: Duration,

    pub max_entries: usize,

    pub eviction_policy: EvictionPolicy,

    /// Interval between expiry sweeps
    pub sweep_interval: Duration,

    /// Constant added to every entry's estimated footprint
    pub entry_overhead_bytes: usize,
}

impl Default for CacheConfiguration {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_entries: 1000,
            eviction_policy: EvictionPolicy::Lru,
            sweep_interval: Duration::from_secs(30),
            entry_overhead_bytes: 64,
        }
    }
}

impl CacheConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load overrides from the environment on top of the defaults
    ///
    /// Reads `CACHE_TTL_SECS`, `CACHE_MAX_ENTRIES`, `CACHE_EVICTION_POLICY`
    /// and `CACHE_SWEEP_INTERVAL_MS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(secs) = env_parse("CACHE_TTL_SECS")? {
            config.ttl = Duration::from_secs(secs);
        }
        if let Some(max) = env_parse("CACHE_MAX_ENTRIES")? {
            config.max_entries = max;
        }
        if let Some(policy) = env_parse::<EvictionPolicy>("CACHE_EVICTION_POLICY")? {
            config.eviction_policy = policy;
        }
        if let Some(ms) = env_parse("CACHE_SWEEP_INTERVAL_MS")? {
            config.sweep_interval = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_entry_overhead(mut self, bytes: usize) -> Self {
        self.entry_overhead_bytes = bytes;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.ttl.is_zero() {
            return Err(ConfigError::ZeroTtl);
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("sweep_interval"));
        }
        Ok(())
    }

    pub fn apply(&self, update: &CacheConfigUpdate) -> CacheConfiguration {
        let mut next = self.clone();
        if let Some(ttl) = update.ttl {
            next.ttl = ttl;
        }
        if let Some(max) = update.max_entries {
            next.max_entries = max;
        }
        if let Some(policy) = update.eviction_policy {
            next.eviction_policy = policy;
        }
        if let Some(interval) = update.sweep_interval {
            next.sweep_interval = interval;
        }
        if let Some(bytes) = update.entry_overhead_bytes {
            next.entry_overhead_bytes = bytes;
        }
        next
    }
}

/// Partial cache configuration update; `None` fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheConfigUpdate {
    pub ttl: Option<Duration>,
    pub max_entries: Option<usize>,
    pub eviction_policy: Option<EvictionPolicy>,
    pub sweep_interval: Option<Duration>,
    pub entry_overhead_bytes: Option<usize>,
}

fn env_parse<T: FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Environment { var, value }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_defaults_are_valid() {
        let config = PoolConfiguration::default();
        assert_eq!(config.min_size, 2);
        assert_eq!(config.idle_strategy, IdleStrategy::Lifo);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pool_rejects_min_above_max() {
        let config = PoolConfiguration::new().with_min_size(5).with_max_size(3);
        assert_eq!(
            config.validate(),
            Err(ConfigError::MinExceedsMax { min: 5, max: 3 })
        );
    }

    #[test]
    fn test_pool_rejects_zero_max() {
        let config = PoolConfiguration::new().with_min_size(0).with_max_size(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroMaxSize));
    }

    #[test]
    fn test_pool_update_applies_only_set_fields() {
        let config = PoolConfiguration::new().with_max_lifetime(Duration::from_secs(60));
        let update = PoolConfigUpdate {
            max_size: Some(4),
            max_lifetime: Some(None),
            ..PoolConfigUpdate::default()
        };

        let next = config.apply(&update);
        assert_eq!(next.max_size, 4);
        assert_eq!(next.min_size, config.min_size);
        assert_eq!(next.max_lifetime, None);
    }

    #[test]
    fn test_cache_rejects_zero_capacity_and_ttl() {
        assert_eq!(
            CacheConfiguration::new().with_max_entries(0).validate(),
            Err(ConfigError::ZeroCapacity)
        );
        assert_eq!(
            CacheConfiguration::new().with_ttl(Duration::ZERO).validate(),
            Err(ConfigError::ZeroTtl)
        );
    }

    #[test]
    fn test_cache_update_switches_policy() {
        let config = CacheConfiguration::new();
        let next = config.apply(&CacheConfigUpdate {
            eviction_policy: Some(EvictionPolicy::Fifo),
            ..CacheConfigUpdate::default()
        });
        assert_eq!(next.eviction_policy, EvictionPolicy::Fifo);
        assert_eq!(next.ttl, config.ttl);
    }

    #[test]
    fn test_env_parse_missing_and_invalid() {
        assert_eq!(
            env_parse::<usize>("RESOURCE_LIFECYCLE_TEST_UNSET_VAR"),
            Ok(None)
        );

        // SAFETY: this variable is only touched by this test
        unsafe { env::set_var("RESOURCE_LIFECYCLE_TEST_BAD_VAR", "many") };
        let result = env_parse::<usize>("RESOURCE_LIFECYCLE_TEST_BAD_VAR");
        unsafe { env::remove_var("RESOURCE_LIFECYCLE_TEST_BAD_VAR") };

        assert_eq!(
            result,
            Err(ConfigError::Environment {
                var: "RESOURCE_LIFECYCLE_TEST_BAD_VAR",
                value: "many".to_string(),
            })
        );
    }
}
