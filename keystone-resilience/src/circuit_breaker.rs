//! Circuit breaker pattern implementation

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests pass through normally
    Closed,
    /// Circuit is open, requests are rejected without reaching the dependency
    Open,
    /// Circuit is half-open, trial requests probe for recovery
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Successes in half-open state before closing
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// Time since the last failure before an open circuit admits a trial call
    #[serde(with = "humantime_serde", default = "default_open_duration")]
    pub open_duration: Duration,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    3
}

fn default_open_duration() -> Duration {
    Duration::from_secs(60)
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            open_duration: default_open_duration(),
        }
    }
}

/// Point-in-time view of a breaker, for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    /// Failures since the circuit last closed. Keeps growing across failed
    /// half-open probes, so it is not "failures since opening".
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_at: Option<Instant>,
    pub total_calls: u64,
    pub total_rejected: u64,
}

/// Errors returned by [`CircuitBreaker::call`]
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// The circuit is open; the operation was not attempted
    #[error("Circuit breaker '{name}' is open, operation not attempted")]
    Open { name: String },

    /// The operation ran and failed
    #[error("{0}")]
    Operation(E),
}

impl<E> CircuitBreakerError<E> {
    /// Whether the call was rejected without invoking the operation.
    ///
    /// Callers should surface this as "temporarily unavailable" rather than a
    /// generic failure.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open { .. })
    }

    /// Get the operation's error, if the operation ran
    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitBreakerError::Open { .. } => None,
            CircuitBreakerError::Operation(error) => Some(error),
        }
    }
}

/// Thread-safe circuit breaker.
///
/// Clones share state. The state check, the protected call and the state
/// update run as one critical section per breaker, so concurrent callers of
/// the same breaker are serialized.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: Arc<CircuitBreakerConfig>,
    state: Arc<Mutex<CircuitBreakerState>>,
}

#[derive(Debug)]
struct CircuitBreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
    total_calls: u64,
    total_rejected: u64,
}

impl CircuitBreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
            total_calls: 0,
            total_rejected: 0,
        }
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: Arc::from(name.into()),
            config: Arc::new(config),
            state: Arc::new(Mutex::new(CircuitBreakerState::new())),
        }
    }

    /// Create with default configuration
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    /// Breaker name used in logs and errors
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Breaker configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `operation` through the breaker
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut state = self.state.lock().await;
        state.total_calls += 1;

        if state.state == CircuitState::Open {
            let open_elapsed = state
                .last_failure_at
                .map_or(true, |at| at.elapsed() >= self.config.open_duration);

            if !open_elapsed {
                state.total_rejected += 1;
                debug!(breaker = %self.name, "Circuit open, rejecting call");
                return Err(CircuitBreakerError::Open {
                    name: self.name.to_string(),
                });
            }

            self.transition_to_half_open(&mut state);
        }

        match operation().await {
            Ok(value) => {
                self.on_success(&mut state);
                Ok(value)
            }
            Err(error) => {
                self.on_failure(&mut state);
                Err(CircuitBreakerError::Operation(error))
            }
        }
    }

    /// Get the current state
    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.state
    }

    /// Snapshot of counters and state
    pub async fn snapshot(&self) -> CircuitSnapshot {
        let state = self.state.lock().await;
        CircuitSnapshot {
            state: state.state,
            failure_count: state.failure_count,
            success_count: state.success_count,
            last_failure_at: state.last_failure_at,
            total_calls: state.total_calls,
            total_rejected: state.total_rejected,
        }
    }

    /// Force the breaker back to closed with cleared counters
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        self.transition_to_closed(&mut state);
        state.last_failure_at = None;
    }

    fn on_success(&self, state: &mut CircuitBreakerState) {
        match state.state {
            CircuitState::Closed => {
                state.failure_count = 0;
                state.success_count = 0;
            }
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    self.transition_to_closed(state);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, state: &mut CircuitBreakerState) {
        state.failure_count = state.failure_count.saturating_add(1);
        state.last_failure_at = Some(Instant::now());

        if state.failure_count >= self.config.failure_threshold {
            self.transition_to_open(state);
        }
    }

    fn transition_to_open(&self, state: &mut CircuitBreakerState) {
        let was = state.state;
        state.state = CircuitState::Open;
        warn!(
            breaker = %self.name,
            from = %was,
            failures = state.failure_count,
            "Circuit breaker opened"
        );
    }

    fn transition_to_half_open(&self, state: &mut CircuitBreakerState) {
        state.state = CircuitState::HalfOpen;
        state.success_count = 0;
        info!(breaker = %self.name, "Circuit breaker half-open, probing dependency");
    }

    fn transition_to_closed(&self, state: &mut CircuitBreakerState) {
        let was = state.state;
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.success_count = 0;
        if was != CircuitState::Closed {
            info!(breaker = %self.name, from = %was, "Circuit breaker closed");
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Builder for circuit breakers
pub struct CircuitBreakerBuilder {
    name: String,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerBuilder {
    /// Create a new builder with default config
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: CircuitBreakerConfig::default(),
        }
    }

    /// Set failure threshold
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Set success threshold for recovery
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    /// Set how long the circuit stays open after the last failure
    pub fn open_duration(mut self, duration: Duration) -> Self {
        self.config.open_duration = duration;
        self
    }

    /// Build the circuit breaker
    pub fn build(self) -> CircuitBreaker {
        CircuitBreaker::new(self.name, self.config)
    }
}
