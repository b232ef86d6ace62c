//! Graceful shutdown configuration

use crate::error::ConfigResult;
use crate::validation::{validate_duration, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Global deadline for the whole sequence, grace period included
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Wait before the first handler runs, letting in-flight work drain
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,

    /// Budget for closing the database pool
    #[serde(with = "humantime_serde")]
    pub database_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            grace_period: Duration::from_secs(5),
            database_timeout: Duration::from_secs(5),
        }
    }
}

impl Validatable for ShutdownConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_duration(self.timeout, "timeout", self.domain_name())?;
        validate_duration(self.database_timeout, "database_timeout", self.domain_name())?;

        if self.grace_period >= self.timeout {
            return Err(self.validation_error(format!(
                "grace_period ({:?}) must be shorter than timeout ({:?})",
                self.grace_period, self.timeout
            )));
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "shutdown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grace_period_must_fit_in_timeout() {
        let mut config = ShutdownConfig::default();
        assert!(config.validate().is_ok());

        config.grace_period = config.timeout;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("grace_period"));
    }
}
