//! Conversions from configuration domains to runtime types

use keystone_config::{CircuitBreakerConfig, DatabaseConfig, HealingConfig, RetryConfig, WritePolicy};
use keystone_resilience::{circuit_breaker, RetryPolicy};
use keystone_storage::{ledger, seaorm};

pub fn retry_policy(config: &RetryConfig) -> RetryPolicy {
    RetryPolicy::new(config.max_retries, config.base_delay)
}

pub fn breaker_config(config: &CircuitBreakerConfig) -> circuit_breaker::CircuitBreakerConfig {
    circuit_breaker::CircuitBreakerConfig {
        failure_threshold: config.failure_threshold,
        success_threshold: config.success_threshold,
        open_duration: config.open_duration,
    }
}

pub fn database_config(config: &DatabaseConfig) -> seaorm::DatabaseConfig {
    seaorm::DatabaseConfig {
        url: config.url.clone(),
        max_connections: config.max_connections,
        connection_timeout: config.connection_timeout,
    }
}

pub fn write_policy(policy: WritePolicy) -> ledger::WritePolicy {
    match policy {
        WritePolicy::Overwrite => ledger::WritePolicy::Overwrite,
        WritePolicy::FirstWriteWins => ledger::WritePolicy::FirstWriteWins,
    }
}

/// Retry budget for one repair attempt
pub fn repair_retry_policy(config: &HealingConfig) -> RetryPolicy {
    RetryPolicy::new(config.repair_max_retries, config.repair_base_delay)
}

/// Breaker guarding each repair action. One success after the open window
/// is enough to trust a repair again.
pub fn repair_breaker_config(config: &HealingConfig) -> circuit_breaker::CircuitBreakerConfig {
    circuit_breaker::CircuitBreakerConfig {
        failure_threshold: config.repair_failure_threshold,
        success_threshold: 1,
        open_duration: config.repair_open_duration,
    }
}
