//! Structured logging for Keystone
//!
//! Installs a global `tracing` subscriber from [`LoggingConfig`]. All crates
//! log through the `tracing` macros; SQL statements reach the same
//! subscriber through SeaORM's `log` bridge.

pub mod init;

pub use init::{filter_directives, init_logging_from_config, init_simple_tracing};
pub use keystone_config::{LogFormat, LogLevel, LoggingConfig};
