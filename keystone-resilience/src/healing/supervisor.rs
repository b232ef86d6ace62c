//! Periodic, non-overlapping supervisory cycles

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    AutoRepair, HealingReport, HealingReportEntry, HealthMonitor, HealthProbe, HealthStatus, RepairAction,
};
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::RetryPolicy;

/// Shortest interval the loop will run at
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Result of asking for a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(HealingReportEntry),
    /// Another cycle was still running
    Skipped,
}

/// Self-healing loop over a dependency: check, repair, record
pub struct SelfHealingSupervisor {
    monitor: HealthMonitor,
    repair: AutoRepair,
    report: Arc<HealingReport>,
    interval: Duration,
    running: AtomicBool,
}

/// Clears the running flag even if a cycle is cancelled midway
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SelfHealingSupervisor {
    pub fn builder() -> SupervisorBuilder {
        SupervisorBuilder::default()
    }

    /// Intervals below [`MIN_INTERVAL`] are raised to it
    pub fn new(monitor: HealthMonitor, repair: AutoRepair, report: Arc<HealingReport>, interval: Duration) -> Self {
        if interval < MIN_INTERVAL {
            warn!(
                interval_ms = interval.as_millis() as u64,
                min_interval_ms = MIN_INTERVAL.as_millis() as u64,
                "Self-healing interval too short, using minimum"
            );
        }

        Self {
            monitor,
            repair,
            report,
            interval: interval.max(MIN_INTERVAL),
            running: AtomicBool::new(false),
        }
    }

    pub fn report(&self) -> Arc<HealingReport> {
        Arc::clone(&self.report)
    }

    pub fn monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    pub fn auto_repair(&self) -> &AutoRepair {
        &self.repair
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_cycle_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one cycle unless another one is in progress
    pub async fn run_cycle(&self) -> CycleOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Self-healing cycle already running, skipping");
            return CycleOutcome::Skipped;
        }
        let _guard = CycleGuard(&self.running);

        let cycle_id = Uuid::new_v4();
        let started_at = Utc::now();

        let health = self.monitor.check().await;

        let mut repairs = Vec::with_capacity(health.issues.len());
        for issue in &health.issues {
            repairs.push(self.repair.attempt(issue).await);
        }

        let entry = HealingReportEntry {
            cycle_id,
            started_at,
            finished_at: Utc::now(),
            health,
            repairs,
        };

        match entry.health.status {
            HealthStatus::Healthy => debug!(%cycle_id, "Self-healing cycle: healthy"),
            status => {
                let failed = entry.failed_repairs().count();
                if failed > 0 {
                    warn!(%cycle_id, %status, issues = entry.health.issues.len(), failed, "Self-healing cycle left issues unrepaired");
                } else {
                    info!(%cycle_id, %status, issues = entry.health.issues.len(), "Self-healing cycle finished");
                }
            }
        }

        self.report.append(entry.clone());
        CycleOutcome::Completed(entry)
    }

    /// Start the periodic loop. The first cycle runs immediately.
    pub fn start(self: &Arc<Self>) -> SupervisorHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let supervisor = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(supervisor.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(interval_ms = supervisor.interval.as_millis() as u64, "Self-healing supervisor started");

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        tokio::select! {
                            _ = supervisor.run_cycle() => {}
                            _ = stop_rx.changed() => break,
                        }
                    }
                }
            }

            info!("Self-healing supervisor stopped");
        });

        SupervisorHandle { stop_tx, task }
    }
}

/// Handle to a running supervisor loop
pub struct SupervisorHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    /// Stop the loop and wait for it to exit. An in-flight cycle is cancelled.
    pub async fn stop(self) -> anyhow::Result<()> {
        let _ = self.stop_tx.send(true);
        self.task.await?;
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Explicit registration of probes and repairs for a supervisor
pub struct SupervisorBuilder {
    interval: Duration,
    probe_timeout: Duration,
    report_capacity: usize,
    retry: RetryPolicy,
    breaker: CircuitBreakerConfig,
    probes: Vec<Arc<dyn HealthProbe>>,
    repairs: Vec<Arc<dyn RepairAction>>,
}

impl Default for SupervisorBuilder {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(10),
            report_capacity: 100,
            retry: RetryPolicy::new(2, Duration::from_millis(200)),
            breaker: CircuitBreakerConfig {
                failure_threshold: 3,
                success_threshold: 1,
                open_duration: Duration::from_secs(300),
            },
            probes: Vec::new(),
            repairs: Vec::new(),
        }
    }
}

impl SupervisorBuilder {
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    pub fn report_capacity(mut self, capacity: usize) -> Self {
        self.report_capacity = capacity;
        self
    }

    /// Retry budget for each repair attempt within a cycle
    pub fn repair_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Breaker settings applied to every repair action
    pub fn repair_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probes.push(probe);
        self
    }

    pub fn with_repair(mut self, repair: Arc<dyn RepairAction>) -> Self {
        self.repairs.push(repair);
        self
    }

    pub fn build(self) -> SelfHealingSupervisor {
        let mut monitor = HealthMonitor::new(self.probe_timeout);
        for probe in self.probes {
            monitor.register(probe);
        }

        let mut repair = AutoRepair::new(self.retry, self.breaker);
        for action in self.repairs {
            repair.register(action);
        }

        SelfHealingSupervisor::new(
            monitor,
            repair,
            Arc::new(HealingReport::new(self.report_capacity)),
            self.interval,
        )
    }
}
