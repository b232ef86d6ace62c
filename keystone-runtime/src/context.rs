//! Process-wide resilience wiring
//!
//! A [`ResilienceContext`] is built once at startup and handed to request
//! handling code by `Arc`. It owns the database, the idempotency ledger, the
//! named circuit breakers, the shutdown sequencer and the self-healing
//! supervisor.

use anyhow::{Context as _, Result};
use keystone_config::KeystoneConfig;
use keystone_resilience::circuit_breaker::CircuitBreakerConfig;
use keystone_resilience::{
    CircuitBreaker, CircuitBreakerError, ComponentOptions, HealingReport, RetryPolicy, SelfHealingSupervisor,
    SequencerState, ShutdownReport, ShutdownSequencer, SupervisorHandle,
};
use keystone_storage::{
    DatabaseConnection, DatabaseConnectivityProbe, ExpiredRecordsProbe, IdempotencyLedger, PurgeExpiredRepair,
    ReconnectRepair,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

use crate::settings;

/// Shutdown component name of the self-healing loop
pub const SUPERVISOR_COMPONENT: &str = "self-healing";
/// Shutdown component name of the database pool
pub const DATABASE_COMPONENT: &str = "database";

/// Named circuit breakers sharing one configuration
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Breaker for a dependency, created on first use. Every call with the
    /// same name shares state.
    pub fn get(&self, name: &str) -> CircuitBreaker {
        self.breakers
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(breaker = name, "Creating circuit breaker");
                CircuitBreaker::new(name, self.config.clone())
            })
            .clone()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

type SupervisorSlot = Arc<Mutex<Option<SupervisorHandle>>>;

pub struct ResilienceContext {
    config: KeystoneConfig,
    database: DatabaseConnection,
    ledger: IdempotencyLedger,
    retry: RetryPolicy,
    breakers: CircuitBreakerRegistry,
    sequencer: Arc<ShutdownSequencer>,
    supervisor: Option<Arc<SelfHealingSupervisor>>,
    supervisor_handle: SupervisorSlot,
}

impl ResilienceContext {
    /// Connect to the database, run migrations and wire every component.
    /// Nothing runs in the background until [`ResilienceContext::start`].
    pub async fn bootstrap(config: KeystoneConfig) -> Result<Arc<Self>> {
        let database = DatabaseConnection::connect_and_migrate(settings::database_config(&config.database))
            .await
            .context("Failed to initialise database")?;

        let ledger = IdempotencyLedger::new(database.clone())
            .with_policy(settings::write_policy(config.idempotency.write_policy))
            .with_default_ttl(config.idempotency.ttl);

        let sequencer = Arc::new(ShutdownSequencer::with_timeouts(
            config.shutdown.timeout,
            config.shutdown.grace_period,
        ));

        let supervisor = config.healing.enabled.then(|| {
            let healing = &config.healing;
            Arc::new(
                SelfHealingSupervisor::builder()
                    .interval(healing.interval)
                    .probe_timeout(healing.probe_timeout)
                    .report_capacity(healing.report_capacity)
                    .repair_retry(settings::repair_retry_policy(healing))
                    .repair_breaker(settings::repair_breaker_config(healing))
                    .with_probe(Arc::new(DatabaseConnectivityProbe::new(database.clone())))
                    .with_probe(Arc::new(ExpiredRecordsProbe::new(
                        ledger.clone(),
                        healing.expired_records_threshold,
                    )))
                    .with_repair(Arc::new(ReconnectRepair::new(database.clone())))
                    .with_repair(Arc::new(PurgeExpiredRepair::new(ledger.clone())))
                    .build(),
            )
        });

        let supervisor_handle: SupervisorSlot = Arc::new(Mutex::new(None));

        // Stop probing before the pool goes away
        if supervisor.is_some() {
            let slot = supervisor_handle.clone();
            sequencer.register_component(
                SUPERVISOR_COMPONENT,
                move || stop_supervisor(slot.clone()),
                ComponentOptions::non_critical(config.healing.probe_timeout),
            )?;
        }

        let db = database.clone();
        sequencer.register_component(
            DATABASE_COMPONENT,
            move || {
                let db = db.clone();
                async move {
                    db.close().await?;
                    Ok(())
                }
            },
            ComponentOptions::critical(config.shutdown.database_timeout),
        )?;

        info!(
            database = %config.database.url,
            healing = config.healing.enabled,
            "Resilience context ready"
        );

        Ok(Arc::new(Self {
            retry: settings::retry_policy(&config.retry),
            breakers: CircuitBreakerRegistry::new(settings::breaker_config(&config.circuit_breaker)),
            config,
            database,
            ledger,
            sequencer,
            supervisor,
            supervisor_handle,
        }))
    }

    pub fn config(&self) -> &KeystoneConfig {
        &self.config
    }

    pub fn database(&self) -> &DatabaseConnection {
        &self.database
    }

    pub fn ledger(&self) -> &IdempotencyLedger {
        &self.ledger
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn breaker(&self, name: &str) -> CircuitBreaker {
        self.breakers.get(name)
    }

    pub fn sequencer(&self) -> &Arc<ShutdownSequencer> {
        &self.sequencer
    }

    pub fn supervisor(&self) -> Option<&Arc<SelfHealingSupervisor>> {
        self.supervisor.as_ref()
    }

    pub fn healing_report(&self) -> Option<Arc<HealingReport>> {
        self.supervisor.as_ref().map(|s| s.report())
    }

    /// Call an external dependency through its named breaker, retrying
    /// transient failures. Each attempt is a separate breaker call, so a
    /// caller sleeping in backoff does not hold up other callers of the same
    /// dependency.
    pub async fn call_external<F, Fut, T, E>(&self, dependency: &str, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let breaker = self.breakers.get(dependency);
        self.retry.retry_with_breaker(&breaker, operation).await
    }

    /// Start the self-healing loop and stop it again as soon as the shutdown
    /// sequence begins
    pub fn start(&self) {
        let Some(supervisor) = &self.supervisor else {
            return;
        };

        {
            let mut slot = self.supervisor_handle.lock();
            if slot.is_some() {
                return;
            }
            *slot = Some(supervisor.start());
        }

        let mut shutdown_rx = self.sequencer.subscribe();
        let slot = self.supervisor_handle.clone();
        tokio::spawn(async move {
            if let Ok(SequencerState::ShuttingDown) = shutdown_rx.recv().await {
                if let Err(e) = stop_supervisor(slot).await {
                    tracing::warn!("Self-healing supervisor did not stop cleanly: {:#}", e);
                }
            }
        });
    }

    /// Run until the shutdown sequence has finished, started by a signal or
    /// by a direct call on the sequencer, and return the process exit code
    pub async fn run_until_shutdown(self: Arc<Self>) -> Result<i32> {
        self.start();

        let report: ShutdownReport = self
            .sequencer
            .initialize()
            .await
            .context("Shutdown task panicked")??;

        Ok(report.exit_code())
    }
}

async fn stop_supervisor(slot: SupervisorSlot) -> Result<()> {
    let handle = slot.lock().take();
    if let Some(handle) = handle {
        handle.stop().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_resilience::{CircuitState, ComponentOutcome};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn test_config() -> KeystoneConfig {
        let mut config = KeystoneConfig::default();
        config.database.url = "sqlite::memory:".to_string();
        config.shutdown.grace_period = Duration::ZERO;
        config.retry.base_delay = Duration::from_millis(1);
        config.circuit_breaker.failure_threshold = 2;
        config
    }

    #[test]
    fn test_registry_shares_breakers_by_name() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
        let a = registry.get("payments");
        let b = registry.get("payments");
        registry.get("ledger-export");

        assert_eq!(a.name(), b.name());
        assert_eq!(registry.names(), vec!["ledger-export".to_string(), "payments".to_string()]);
    }

    #[tokio::test]
    async fn test_bootstrap_registers_shutdown_components() {
        let context = ResilienceContext::bootstrap(test_config()).await.unwrap();

        assert_eq!(
            context.sequencer().component_names(),
            vec![SUPERVISOR_COMPONENT.to_string(), DATABASE_COMPONENT.to_string()]
        );
        assert!(context.supervisor().is_some());
        assert!(context.database().ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_disabled_healing_has_no_supervisor() {
        let mut config = test_config();
        config.healing.enabled = false;

        let context = ResilienceContext::bootstrap(config).await.unwrap();

        assert!(context.supervisor().is_none());
        assert!(context.healing_report().is_none());
        assert_eq!(context.sequencer().component_names(), vec![DATABASE_COMPONENT.to_string()]);
    }

    #[tokio::test]
    async fn test_call_external_stops_retrying_once_breaker_opens() {
        let context = ResilienceContext::bootstrap(test_config()).await.unwrap();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = context
            .call_external("payments", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("gateway timeout") }
            })
            .await;

        // The second failed attempt reaches the threshold of 2
        assert!(matches!(result, Err(CircuitBreakerError::Operation("gateway timeout"))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(context.breaker("payments").state().await, CircuitState::Open);

        let rejected: Result<(), CircuitBreakerError<&str>> =
            context.call_external("payments", || async { Ok(()) }).await;
        assert!(rejected.unwrap_err().is_circuit_open());
    }

    #[tokio::test]
    async fn test_backoff_does_not_stall_other_callers() {
        let mut config = test_config();
        config.retry.max_retries = 3;
        config.retry.base_delay = Duration::from_millis(100);
        config.circuit_breaker.failure_threshold = 10;
        let context = ResilienceContext::bootstrap(config).await.unwrap();

        let failing = context.call_external("payments", || async { Err::<(), _>("gateway timeout") });
        let healthy = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let started = std::time::Instant::now();
            let result = context.call_external("payments", || async { Ok::<_, &str>(7) }).await;
            (result, started.elapsed())
        };

        let (failed, (result, waited)) = tokio::join!(failing, healthy);

        assert!(failed.is_err());
        assert_eq!(result.unwrap(), 7);
        assert!(waited < Duration::from_millis(50), "healthy call waited {:?}", waited);
    }

    #[tokio::test]
    async fn test_shutdown_stops_supervisor_and_closes_database() {
        let context = ResilienceContext::bootstrap(test_config()).await.unwrap();
        context.start();

        let report = context.sequencer().shutdown().await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.exit_code(), 0);
        assert_eq!(
            report.component(SUPERVISOR_COMPONENT).unwrap().outcome,
            ComponentOutcome::Completed
        );
        assert_eq!(
            report.component(DATABASE_COMPONENT).unwrap().outcome,
            ComponentOutcome::Completed
        );
        assert!(context.database().ping().await.is_err());
    }

    #[tokio::test]
    async fn test_manual_shutdown_ends_run_until_shutdown() {
        let context = ResilienceContext::bootstrap(test_config()).await.unwrap();

        let running = tokio::spawn(context.clone().run_until_shutdown());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!running.is_finished());

        let report = context.sequencer().shutdown().await.unwrap();

        let exit_code = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .expect("run_until_shutdown should return")
            .unwrap()
            .unwrap();
        assert_eq!(exit_code, report.exit_code());
        assert_eq!(exit_code, 0);
    }
}
