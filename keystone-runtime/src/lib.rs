//! Keystone runtime
//!
//! Builds the [`ResilienceContext`] from configuration and drives the process
//! lifecycle: start background supervision, wait for a termination signal,
//! run the shutdown sequence and report the exit code.

pub mod context;
pub mod settings;

pub use context::{CircuitBreakerRegistry, ResilienceContext, DATABASE_COMPONENT, SUPERVISOR_COMPONENT};
