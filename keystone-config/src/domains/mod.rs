//! Domain-specific configuration modules

pub mod database;
pub mod healing;
pub mod idempotency;
pub mod logging;
pub mod resilience;
pub mod shutdown;

use crate::error::ConfigResult;
use serde::{Deserialize, Serialize};

/// Main Keystone configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KeystoneConfig {
    pub database: database::DatabaseConfig,

    pub logging: logging::LoggingConfig,

    /// Retry policy for calls to external systems
    pub retry: resilience::RetryConfig,

    /// Breaker settings for calls to external systems
    pub circuit_breaker: resilience::CircuitBreakerConfig,

    pub idempotency: idempotency::IdempotencyConfig,

    pub shutdown: shutdown::ShutdownConfig,

    pub healing: healing::HealingConfig,
}

impl KeystoneConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        crate::validation::validate_config(self)
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = KeystoneConfig::default();
        serde_yaml::to_string(&config).unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}
