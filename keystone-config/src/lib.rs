//! Domain-driven configuration management for Keystone
//!
//! Configuration is split by functional domain, loaded from YAML, overridden
//! by `KEYSTONE_*` environment variables and validated per domain.

pub mod domains;
pub mod error;
pub mod loader;
pub mod validation;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;

// Re-export domain configurations
pub use domains::{
    database::DatabaseConfig,
    healing::HealingConfig,
    idempotency::{IdempotencyConfig, WritePolicy},
    logging::{LogFormat, LogLevel, LoggingConfig},
    resilience::{CircuitBreakerConfig, RetryConfig},
    shutdown::ShutdownConfig,
    KeystoneConfig,
};
