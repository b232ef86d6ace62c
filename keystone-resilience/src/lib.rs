//! Resilience patterns for Keystone
//!
//! This crate provides retry policies, circuit breakers, graceful shutdown
//! sequencing and a self-healing supervisor for persistent dependencies.

pub mod backoff;
#[cfg(feature = "circuit-breaker")]
pub mod circuit_breaker;
#[cfg(feature = "healing")]
pub mod healing;
#[cfg(feature = "retry")]
pub mod retry;
#[cfg(feature = "shutdown")]
pub mod shutdown;

// Re-export commonly used types
pub use backoff::ExponentialBackoff;
#[cfg(feature = "circuit-breaker")]
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerBuilder, CircuitBreakerConfig, CircuitBreakerError, CircuitSnapshot, CircuitState,
};
#[cfg(feature = "healing")]
pub use healing::{
    AutoRepair, CycleOutcome, HealingReport, HealingReportEntry, HealthCheckResult, HealthIssue, HealthMonitor,
    HealthProbe, HealthStatus, IssueSeverity, RepairAction, RepairOutcome, RepairResult, SelfHealingSupervisor,
    SupervisorBuilder, SupervisorHandle,
};
#[cfg(feature = "retry")]
pub use retry::{retry, RetryPolicy};
#[cfg(feature = "shutdown")]
pub use shutdown::{
    ComponentOptions, ComponentOutcome, ComponentReport, SequencerState, ShutdownError, ShutdownHandler,
    ShutdownReport, ShutdownSequencer,
};
