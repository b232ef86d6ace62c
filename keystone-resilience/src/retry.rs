//! Retry policy with exponential backoff and jitter

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::backoff::ExponentialBackoff;
#[cfg(feature = "circuit-breaker")]
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};

/// Retry policy configuration
///
/// An operation is invoked at most `max_retries + 1` times. The last error is
/// returned to the caller exactly as the operation produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay the exponential backoff scales from
    #[serde(with = "humantime_serde", default = "default_base_delay")]
    pub base_delay: Duration,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_millis(200)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay: default_base_delay(),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with explicit limits
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Backoff calculator for this policy
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.base_delay)
    }

    /// Run `operation`, retrying failures with backoff.
    ///
    /// Every retry re-invokes `operation`; callers that cannot tolerate
    /// repeated side effects should guard it with an idempotency key.
    pub async fn retry<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.retry_with_attempt(|_attempt| operation()).await
    }

    /// Run `operation` with the 1-based attempt number, retrying failures
    pub async fn retry_with_attempt<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let backoff = self.backoff();
        let mut retries_made = 0u32;

        loop {
            let attempt = retries_made + 1;

            match operation(attempt).await {
                Ok(value) => {
                    if retries_made > 0 {
                        debug!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if retries_made >= self.max_retries {
                        warn!(
                            attempts = attempt,
                            error = %error,
                            "Operation failed, retry budget exhausted"
                        );
                        return Err(error);
                    }

                    let delay = backoff.delay_for(retries_made);
                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Operation failed, retrying"
                    );
                    sleep(delay).await;

                    retries_made += 1;
                }
            }
        }
    }
}

#[cfg(feature = "circuit-breaker")]
impl RetryPolicy {
    /// Retry `operation` with every attempt going through `breaker` as its
    /// own call.
    ///
    /// The breaker is held only while an attempt runs. Backoff sleeps happen
    /// outside it, so other callers of the same dependency neither queue
    /// behind this loop nor lose their fail-fast rejection. Retrying stops as
    /// soon as the circuit is open: a rejected attempt returns
    /// [`CircuitBreakerError::Open`], and a failure that opened the circuit is
    /// returned as is.
    pub async fn retry_with_breaker<F, Fut, T, E>(
        &self,
        breaker: &CircuitBreaker,
        mut operation: F,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let backoff = self.backoff();
        let mut retries_made = 0u32;

        loop {
            let attempt = retries_made + 1;

            let error = match breaker.call(&mut operation).await {
                Ok(value) => return Ok(value),
                Err(CircuitBreakerError::Open { name }) => {
                    debug!(breaker = %name, attempt, "Circuit open, not retrying");
                    return Err(CircuitBreakerError::Open { name });
                }
                Err(CircuitBreakerError::Operation(error)) => error,
            };

            if retries_made >= self.max_retries {
                warn!(
                    breaker = breaker.name(),
                    attempts = attempt,
                    error = %error,
                    "Operation failed, retry budget exhausted"
                );
                return Err(CircuitBreakerError::Operation(error));
            }

            if breaker.state().await == CircuitState::Open {
                warn!(
                    breaker = breaker.name(),
                    attempts = attempt,
                    error = %error,
                    "Operation failed and opened the circuit, not retrying"
                );
                return Err(CircuitBreakerError::Operation(error));
            }

            let delay = backoff.delay_for(retries_made);
            warn!(
                breaker = breaker.name(),
                attempt,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Operation failed, retrying"
            );
            sleep(delay).await;

            retries_made += 1;
        }
    }
}

/// Run `operation` with `max_retries` retries and the given base delay
pub async fn retry<F, Fut, T, E>(operation: F, max_retries: u32, base_delay: Duration) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    RetryPolicy::new(max_retries, base_delay).retry(operation).await
}
