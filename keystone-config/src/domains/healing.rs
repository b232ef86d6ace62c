//! Self-healing supervisor configuration

use crate::error::ConfigResult;
use crate::validation::{validate_duration, validate_positive, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealingConfig {
    pub enabled: bool,

    /// Time between supervisory cycles
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Budget for each health probe
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,

    /// Cycles kept in the healing report
    pub report_capacity: usize,

    /// Retries per repair attempt within one cycle
    pub repair_max_retries: u32,

    #[serde(with = "humantime_serde")]
    pub repair_base_delay: Duration,

    /// Failed repair attempts before a repair's circuit opens
    pub repair_failure_threshold: u32,

    /// How long a failing repair is skipped
    #[serde(with = "humantime_serde")]
    pub repair_open_duration: Duration,

    /// Expired ledger records tolerated before a purge is requested
    pub expired_records_threshold: u64,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(10),
            report_capacity: 100,
            repair_max_retries: 2,
            repair_base_delay: Duration::from_millis(200),
            repair_failure_threshold: 3,
            repair_open_duration: Duration::from_secs(300),
            expired_records_threshold: 1000,
        }
    }
}

impl Validatable for HealingConfig {
    fn validate(&self) -> ConfigResult<()> {
        if !self.enabled {
            return Ok(());
        }

        validate_duration(self.interval, "interval", self.domain_name())?;
        validate_duration(self.probe_timeout, "probe_timeout", self.domain_name())?;
        validate_positive(self.report_capacity, "report_capacity", self.domain_name())?;
        validate_positive(self.repair_failure_threshold, "repair_failure_threshold", self.domain_name())?;
        validate_duration(self.repair_open_duration, "repair_open_duration", self.domain_name())?;

        if self.probe_timeout > self.interval {
            tracing::warn!(
                "healing.probe_timeout ({:?}) exceeds interval ({:?}); slow cycles will skip ticks",
                self.probe_timeout,
                self.interval
            );
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "healing"
    }
}
