//! Retry and circuit breaker settings

use crate::error::ConfigResult;
use crate::validation::{validate_duration, validate_positive, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff retry settings for calls to external systems
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Backoff unit; attempt `n` waits `2^n * base_delay` plus jitter
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl Validatable for RetryConfig {
    fn validate(&self) -> ConfigResult<()> {
        // Zero retries and a zero delay are both legitimate
        if self.base_delay > Duration::from_secs(3600) {
            return Err(self.validation_error("base_delay cannot exceed one hour"));
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "retry"
    }
}

/// Circuit breaker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,

    /// Half-open successes that close it again
    pub success_threshold: u32,

    /// How long the circuit stays open before a trial call
    #[serde(with = "humantime_serde")]
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            open_duration: Duration::from_secs(60),
        }
    }
}

impl Validatable for CircuitBreakerConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.failure_threshold, "failure_threshold", self.domain_name())?;
        validate_positive(self.success_threshold, "success_threshold", self.domain_name())?;
        validate_duration(self.open_duration, "open_duration", self.domain_name())?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "circuit_breaker"
    }
}
