//! Error types for the pool and cache

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Error type produced by a [`ResourceFactory`](crate::ResourceFactory)
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned by [`Pool`](crate::Pool) operations
#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("No resource became available within {0:?}")]
    AcquireTimeout(Duration),

    #[error("Pool is shutting down")]
    ShuttingDown,

    #[error("Resource creation failed: {0}")]
    ResourceCreationFailed(#[source] Arc<dyn std::error::Error + Send + Sync + 'static>),

    #[error("Circuit breaker is open - resource creation keeps failing")]
    CircuitBreakerOpen,
}

impl PoolError {
    /// Whether retrying against the same pool can succeed.
    ///
    /// Only a closing pool is a terminal condition; backoff policy is left
    /// to the caller.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PoolError::ShuttingDown)
    }

    pub(crate) fn creation(source: BoxError) -> Self {
        PoolError::ResourceCreationFailed(Arc::from(source))
    }
}

pub type PoolResult<T> = Result<T, PoolError>;

/// Configuration validation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("min_size ({min}) must not exceed max_size ({max})")]
    MinExceedsMax { min: usize, max: usize },

    #[error("max_size must be greater than zero")]
    ZeroMaxSize,

    #[error("max_entries must be greater than zero")]
    ZeroCapacity,

    #[error("ttl must be greater than zero")]
    ZeroTtl,

    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("Invalid value {value:?} for environment variable {var}")]
    Environment { var: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(PoolError::AcquireTimeout(Duration::from_millis(5)).is_retryable());
        assert!(PoolError::CircuitBreakerOpen.is_retryable());
        assert!(PoolError::creation("refused".into()).is_retryable());
        assert!(!PoolError::ShuttingDown.is_retryable());
    }

    #[test]
    fn test_creation_error_keeps_source() {
        let err = PoolError::creation("connection refused".into());
        assert_eq!(err.to_string(), "Resource creation failed: connection refused");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_timeout_carries_duration() {
        let err = PoolError::AcquireTimeout(Duration::from_millis(50));
        assert!(err.to_string().contains("50ms"));
    }
}
