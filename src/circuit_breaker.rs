//! Circuit breaker guarding resource creation

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Circuit breaker state
///
/// # Examples
///
/// ```
/// use resource_lifecycle::{CircuitBreaker, CircuitBreakerState};
/// use std::time::Duration;
///
/// let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
/// assert_eq!(breaker.state(), CircuitBreakerState::Closed);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerState {
    /// Creation attempts go through
    Closed,

    /// Creation attempts fail fast until the reset timeout elapses
    Open,

    /// One probe attempt is in flight
    HalfOpen,
}

struct BreakerInner {
    state: CircuitBreakerState,
    consecutive_failures: usize,
    opened_at: Option<Instant>,
}

/// Fails resource creation fast after repeated factory failures
///
/// After `failure_threshold` consecutive failures the breaker opens. Once
/// `reset_timeout` has passed a single probe is let through: success closes
/// the breaker, failure re-opens it.
///
/// # Examples
///
/// ```
/// use resource_lifecycle::CircuitBreaker;
/// use std::time::Duration;
///
/// let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
/// breaker.record_failure();
/// breaker.record_failure();
///
/// assert!(!breaker.allow_request());
/// ```
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    failure_threshold: usize,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: usize, reset_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitBreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
        }
    }

    pub fn state(&self) -> CircuitBreakerState {
        self.inner.lock().state
    }

    /// Check if a creation attempt may proceed
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitBreakerState::Closed => true,
            CircuitBreakerState::Open => {
                if let Some(opened_at) = inner.opened_at
                    && opened_at.elapsed() >= self.reset_timeout
                {
                    inner.state = CircuitBreakerState::HalfOpen;
                    tracing::debug!("circuit breaker half-open, probing");
                    return true;
                }
                false
            }
            // The probe is already in flight
            CircuitBreakerState::HalfOpen => false,
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitBreakerState::Closed {
            tracing::info!("circuit breaker closed");
        }
        inner.state = CircuitBreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;

        let trip = match inner.state {
            CircuitBreakerState::Closed => inner.consecutive_failures >= self.failure_threshold,
            CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Open => false,
        };

        if trip {
            inner.state = CircuitBreakerState::Open;
            inner.opened_at = Some(Instant::now());
            tracing::warn!(
                failures = inner.consecutive_failures,
                reset_timeout = ?self.reset_timeout,
                "circuit breaker opened"
            );
        }
    }

    /// Report an attempt that ended without an outcome
    ///
    /// A half-open attempt that never finished re-opens the breaker, so the
    /// next attempt is let through after another `reset_timeout`.
    pub fn record_abandoned(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitBreakerState::HalfOpen {
            inner.state = CircuitBreakerState::Open;
            inner.opened_at = Some(Instant::now());
            tracing::debug!("circuit breaker half-open attempt abandoned");
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitBreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}
