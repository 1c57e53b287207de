//! Rate limiter configuration.
//!
//! The only tunable is the flush interval. The operator ID identifies the
//! limiter in checkpoints and defaults to a process-unique name.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Static counter for generating unique operator IDs.
static OPERATOR_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Errors from configuration validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Interval is zero
    #[error("flush interval must be greater than zero")]
    ZeroInterval,

    /// Interval does not fit in i64 milliseconds
    #[error("flush interval of {0:?} does not fit in i64 milliseconds")]
    IntervalOverflow(Duration),

    /// Operator ID is blank
    #[error("operator ID must not be empty")]
    EmptyOperatorId,
}

/// Configuration for a windowed snapshot rate limiter.
///
/// # Example
///
/// ```rust
/// use laminar_ratelimit::RateLimiterConfig;
/// use std::time::Duration;
///
/// let config = RateLimiterConfig::new(Duration::from_secs(5)).with_operator_id("stock_snapshot");
/// assert!(config.validate().is_ok());
/// assert_eq!(config.interval_ms().unwrap(), 5000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Cadence of snapshot emission
    pub interval: Duration,
    /// Operator ID used for checkpointing. `None` = generated.
    #[serde(default)]
    pub operator_id: Option<String>,
}

impl RateLimiterConfig {
    /// Creates a config with the given flush interval.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            operator_id: None,
        }
    }

    /// Sets an explicit operator ID.
    #[must_use]
    pub fn with_operator_id(mut self, operator_id: impl Into<String>) -> Self {
        self.operator_id = Some(operator_id.into());
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the interval is zero or too large, or the
    /// operator ID is blank.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.interval_ms()?;
        if let Some(id) = &self.operator_id {
            if id.trim().is_empty() {
                return Err(ConfigError::EmptyOperatorId);
            }
        }
        Ok(())
    }

    /// Returns the interval in milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the interval is zero or does not fit in i64.
    pub fn interval_ms(&self) -> Result<i64, ConfigError> {
        let ms = i64::try_from(self.interval.as_millis())
            .map_err(|_| ConfigError::IntervalOverflow(self.interval))?;
        if ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(ms)
    }

    /// Resolves the operator ID, generating one if none was set.
    pub(crate) fn resolve_operator_id(&self) -> String {
        self.operator_id.clone().unwrap_or_else(|| {
            let n = OPERATOR_COUNTER.fetch_add(1, Ordering::Relaxed);
            format!("snapshot_rate_limiter_{n}")
        })
    }
}
