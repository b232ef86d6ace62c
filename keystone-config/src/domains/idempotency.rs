//! Idempotency ledger configuration

use crate::error::ConfigResult;
use crate::validation::{validate_duration, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    /// How long completed records are kept
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// What happens when a completed request id is marked again
    pub write_policy: WritePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    #[default]
    Overwrite,
    FirstWriteWins,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(10 * 365 * 24 * 60 * 60),
            write_policy: WritePolicy::Overwrite,
        }
    }
}

impl Validatable for IdempotencyConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_duration(self.ttl, "ttl", self.domain_name())
    }

    fn domain_name(&self) -> &'static str {
        "idempotency"
    }
}
