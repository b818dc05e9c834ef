//! Health classification for resource pools

use crate::metrics::PoolStats;
use serde::Serialize;
use std::time::Duration;

/// Overall pool health, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Thresholds used by [`Pool::health_check`](crate::Pool::health_check)
///
/// The values are policy, not protocol: deployments tune them per pool.
///
/// # Examples
///
/// ```
/// use resource_lifecycle::HealthThresholds;
/// use std::time::Duration;
///
/// let thresholds = HealthThresholds::default()
///     .with_error_rates(0.01, 0.10)
///     .with_latencies(Duration::from_millis(20), Duration::from_millis(250));
///
/// assert_eq!(thresholds.degraded_error_rate, 0.01);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthThresholds {
    /// Failed acquire ratio above which the pool is degraded
    pub degraded_error_rate: f64,

    /// Failed acquire ratio above which the pool is unhealthy
    pub unhealthy_error_rate: f64,

    /// Average acquire latency above which the pool is degraded
    pub degraded_latency: Duration,

    /// Average acquire latency above which the pool is unhealthy
    pub unhealthy_latency: Duration,

    /// Utilization above which a warning is reported (does not change status)
    pub utilization_warning: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            degraded_error_rate: 0.05,
            unhealthy_error_rate: 0.25,
            degraded_latency: Duration::from_millis(100),
            unhealthy_latency: Duration::from_secs(1),
            utilization_warning: 0.9,
        }
    }
}

impl HealthThresholds {
    pub fn with_error_rates(mut self, degraded: f64, unhealthy: f64) -> Self {
        self.degraded_error_rate = degraded;
        self.unhealthy_error_rate = unhealthy;
        self
    }

    pub fn with_latencies(mut self, degraded: Duration, unhealthy: Duration) -> Self {
        self.degraded_latency = degraded;
        self.unhealthy_latency = unhealthy;
        self
    }

    pub fn with_utilization_warning(mut self, ratio: f64) -> Self {
        self.utilization_warning = ratio;
        self
    }
}

/// Result of a pool health check
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,

    /// Failed acquires over all acquire attempts (0.0 to 1.0)
    pub error_rate: f64,

    /// Running average acquire latency
    pub average_latency: Duration,

    /// Leased handles over max size (0.0 to 1.0)
    pub utilization: f64,

    /// Human readable reasons behind the status
    pub warnings: Vec<String>,
}

impl HealthReport {
    /// Classify a stats snapshot against the given thresholds
    pub fn evaluate(stats: &PoolStats, thresholds: &HealthThresholds) -> Self {
        let error_rate = stats.error_rate();
        let average_latency = stats.average_acquire_latency;
        let mut status = HealthStatus::Healthy;
        let mut warnings = Vec::new();

        if error_rate > thresholds.unhealthy_error_rate {
            status = HealthStatus::Unhealthy;
            warnings.push(format!("Error rate critical: {:.1}%", error_rate * 100.0));
        } else if error_rate > thresholds.degraded_error_rate {
            status = HealthStatus::Degraded;
            warnings.push(format!("Error rate elevated: {:.1}%", error_rate * 100.0));
        }

        if average_latency > thresholds.unhealthy_latency {
            status = status.max(HealthStatus::Unhealthy);
            warnings.push(format!("Acquire latency critical: {average_latency:?}"));
        } else if average_latency > thresholds.degraded_latency {
            status = status.max(HealthStatus::Degraded);
            warnings.push(format!("Acquire latency elevated: {average_latency:?}"));
        }

        if stats.utilization > thresholds.utilization_warning {
            warnings.push(format!("High utilization: {:.1}%", stats.utilization * 100.0));
        }

        if stats.waiting > 0 {
            warnings.push(format!("{} callers waiting for a handle", stats.waiting));
        }

        Self {
            status,
            error_rate,
            average_latency,
            utilization: stats.utilization,
            warnings,
        }
    }

    /// Check if the pool is healthy
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}
