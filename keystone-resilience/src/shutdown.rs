//! Graceful shutdown sequencing
//!
//! The [`ShutdownSequencer`] owns a closed set of named teardown handlers.
//! When triggered (by SIGINT/SIGTERM or manually) it waits out a grace period,
//! then runs every handler in registration order, each raced against its own
//! timeout. The whole sequence is bounded by a global deadline measured from
//! the moment the sequence starts, so a hung handler can never keep the
//! process alive indefinitely.

use futures::future::{BoxFuture, FutureExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{error, info, warn};

/// Teardown action registered with the sequencer
pub type ShutdownHandler = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Global sequencer state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SequencerState {
    Idle,
    ShuttingDown,
}

impl std::fmt::Display for SequencerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SequencerState::Idle => write!(f, "idle"),
            SequencerState::ShuttingDown => write!(f, "shutting_down"),
        }
    }
}

/// Per-component registration options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentOptions {
    /// How long the handler may run before it is abandoned
    pub timeout: Duration,
    /// Whether a failure of this component makes the shutdown fail
    pub critical: bool,
}

impl ComponentOptions {
    pub fn new(timeout: Duration, critical: bool) -> Self {
        Self { timeout, critical }
    }

    pub fn critical(timeout: Duration) -> Self {
        Self::new(timeout, true)
    }

    pub fn non_critical(timeout: Duration) -> Self {
        Self::new(timeout, false)
    }
}

impl Default for ComponentOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            critical: false,
        }
    }
}

#[derive(Clone)]
struct ShutdownComponent {
    name: String,
    handler: ShutdownHandler,
    options: ComponentOptions,
}

/// Outcome of one component's teardown
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "message", rename_all = "snake_case")]
pub enum ComponentOutcome {
    Completed,
    /// The handler returned an error
    Failed(String),
    /// The handler did not settle within its own timeout
    TimedOut,
    /// The global deadline passed before the handler finished or started
    Abandoned,
}

/// Report entry for one component
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentReport {
    pub name: String,
    pub critical: bool,
    pub outcome: ComponentOutcome,
    pub elapsed: Duration,
}

impl ComponentReport {
    pub fn is_failure(&self) -> bool {
        self.outcome != ComponentOutcome::Completed
    }
}

/// Result of a complete shutdown sequence
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownReport {
    /// Reports in registration order
    pub components: Vec<ComponentReport>,
    /// The global deadline cut the sequence short
    pub deadline_exceeded: bool,
    pub elapsed: Duration,
}

impl ShutdownReport {
    /// Report for a named component
    pub fn component(&self, name: &str) -> Option<&ComponentReport> {
        self.components.iter().find(|c| c.name == name)
    }

    /// Critical components that did not complete
    pub fn critical_failures(&self) -> impl Iterator<Item = &ComponentReport> {
        self.components.iter().filter(|c| c.critical && c.is_failure())
    }

    pub fn is_success(&self) -> bool {
        !self.deadline_exceeded && self.critical_failures().next().is_none()
    }

    /// Process exit code the bootstrap layer should use
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SequencerSettings {
    shutdown_timeout: Duration,
    grace_period: Duration,
}

/// Orderly, time-bounded teardown of registered components
pub struct ShutdownSequencer {
    components: RwLock<Vec<ShutdownComponent>>,
    shutting_down: AtomicBool,
    settings: Mutex<SequencerSettings>,
    sender: broadcast::Sender<SequencerState>,
    report: watch::Sender<Option<ShutdownReport>>,
}

impl ShutdownSequencer {
    /// Create a sequencer with a 30s global deadline and a 5s grace period
    pub fn new() -> Self {
        Self::with_timeouts(Duration::from_secs(30), Duration::from_secs(5))
    }

    /// Create a sequencer with explicit timeouts
    pub fn with_timeouts(shutdown_timeout: Duration, grace_period: Duration) -> Self {
        let (sender, _) = broadcast::channel(4);

        Self {
            components: RwLock::new(Vec::new()),
            shutting_down: AtomicBool::new(false),
            settings: Mutex::new(SequencerSettings {
                shutdown_timeout,
                grace_period,
            }),
            sender,
            report: watch::Sender::new(None),
        }
    }

    /// Register a named teardown handler.
    ///
    /// Names are unique and the set is closed once the sequence has started.
    pub fn register_component<F, Fut>(
        &self,
        name: impl Into<String>,
        handler: F,
        options: ComponentOptions,
    ) -> Result<(), ShutdownError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();

        // Checked under the write lock so a registration cannot slip past the
        // snapshot taken by `shutdown`
        let mut components = self.components.write();
        if self.is_shutting_down() {
            return Err(ShutdownError::AlreadyShuttingDown);
        }
        if components.iter().any(|c| c.name == name) {
            return Err(ShutdownError::DuplicateComponent(name));
        }

        info!(
            component = %name,
            timeout_ms = options.timeout.as_millis() as u64,
            critical = options.critical,
            "Registered shutdown component"
        );

        components.push(ShutdownComponent {
            name,
            handler: Arc::new(move || handler().boxed()),
            options,
        });

        Ok(())
    }

    /// Names of registered components, in teardown order
    pub fn component_names(&self) -> Vec<String> {
        self.components.read().iter().map(|c| c.name.clone()).collect()
    }

    pub fn state(&self) -> SequencerState {
        if self.is_shutting_down() {
            SequencerState::ShuttingDown
        } else {
            SequencerState::Idle
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Set the global deadline, measured from the start of the sequence
    pub fn set_shutdown_timeout(&self, shutdown_timeout: Duration) {
        self.settings.lock().shutdown_timeout = shutdown_timeout;
    }

    /// Set how long to wait for in-flight work before running handlers
    pub fn set_grace_period(&self, grace_period: Duration) {
        self.settings.lock().grace_period = grace_period;
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.settings.lock().shutdown_timeout
    }

    pub fn grace_period(&self) -> Duration {
        self.settings.lock().grace_period
    }

    /// Subscribe to the start-of-shutdown notification
    pub fn subscribe(&self) -> broadcast::Receiver<SequencerState> {
        self.sender.subscribe()
    }

    /// Install termination signal hooks.
    ///
    /// The returned task resolves with the shutdown report once the sequence
    /// has finished, whether a signal or a manual [`ShutdownSequencer::shutdown`]
    /// started it. The caller decides how to exit, typically with
    /// [`ShutdownReport::exit_code`].
    pub fn initialize(self: &Arc<Self>) -> JoinHandle<Result<ShutdownReport, ShutdownError>> {
        let sequencer = Arc::clone(self);

        tokio::spawn(async move {
            let signal = tokio::select! {
                report = sequencer.wait_for_report() => return Ok(report),
                signal = wait_for_termination_signal() => signal?,
            };

            info!(signal, "Termination signal received");
            match sequencer.shutdown().await {
                Err(ShutdownError::AlreadyShuttingDown) => Ok(sequencer.wait_for_report().await),
                result => result,
            }
        })
    }

    /// Report of the finished sequence, if it has run
    pub fn report(&self) -> Option<ShutdownReport> {
        self.report.borrow().clone()
    }

    /// Wait until the sequence has finished, however it was triggered
    pub async fn wait_for_report(&self) -> ShutdownReport {
        let mut reports = self.report.subscribe();
        loop {
            if let Some(report) = reports.borrow_and_update().clone() {
                return report;
            }
            // The sender lives as long as `self`
            let _ = reports.changed().await;
        }
    }

    /// Run the shutdown sequence now
    pub async fn shutdown(&self) -> Result<ShutdownReport, ShutdownError> {
        let components = {
            let components = self.components.write();
            if self.shutting_down.swap(true, Ordering::SeqCst) {
                return Err(ShutdownError::AlreadyShuttingDown);
            }
            components.clone()
        };

        let settings = *self.settings.lock();

        info!(
            components = components.len(),
            shutdown_timeout_ms = settings.shutdown_timeout.as_millis() as u64,
            grace_period_ms = settings.grace_period.as_millis() as u64,
            "Starting shutdown sequence"
        );

        // No subscribers is fine
        let _ = self.sender.send(SequencerState::ShuttingDown);

        let started = Instant::now();
        let reports = Mutex::new(Vec::with_capacity(components.len()));

        let deadline_exceeded = timeout(
            settings.shutdown_timeout,
            run_sequence(&components, settings.grace_period, &reports),
        )
        .await
        .is_err();

        let mut reports = reports.into_inner();

        if deadline_exceeded {
            error!(
                shutdown_timeout_ms = settings.shutdown_timeout.as_millis() as u64,
                "Shutdown deadline exceeded, abandoning remaining components"
            );

            for component in components.iter().skip(reports.len()) {
                reports.push(ComponentReport {
                    name: component.name.clone(),
                    critical: component.options.critical,
                    outcome: ComponentOutcome::Abandoned,
                    elapsed: Duration::ZERO,
                });
            }
        }

        let report = ShutdownReport {
            components: reports,
            deadline_exceeded,
            elapsed: started.elapsed(),
        };

        if report.is_success() {
            info!(elapsed_ms = report.elapsed.as_millis() as u64, "Shutdown sequence completed");
        } else {
            let failed: Vec<&str> = report.critical_failures().map(|c| c.name.as_str()).collect();
            error!(
                elapsed_ms = report.elapsed.as_millis() as u64,
                critical_failures = ?failed,
                deadline_exceeded,
                "Shutdown sequence failed"
            );
        }

        self.report.send_replace(Some(report.clone()));
        Ok(report)
    }
}

impl Default for ShutdownSequencer {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_sequence(
    components: &[ShutdownComponent],
    grace_period: Duration,
    reports: &Mutex<Vec<ComponentReport>>,
) {
    if !grace_period.is_zero() {
        info!(grace_period_ms = grace_period.as_millis() as u64, "Waiting for grace period");
        sleep(grace_period).await;
    }

    for component in components {
        let started = Instant::now();

        let outcome = match timeout(component.options.timeout, (component.handler)()).await {
            Ok(Ok(())) => ComponentOutcome::Completed,
            Ok(Err(e)) => ComponentOutcome::Failed(format!("{:#}", e)),
            Err(_) => ComponentOutcome::TimedOut,
        };

        let elapsed = started.elapsed();
        match &outcome {
            ComponentOutcome::Completed => {
                info!(component = %component.name, elapsed_ms = elapsed.as_millis() as u64, "Component shut down");
            }
            other if component.options.critical => {
                error!(component = %component.name, outcome = ?other, "Critical component failed to shut down");
            }
            other => {
                warn!(component = %component.name, outcome = ?other, "Component failed to shut down");
            }
        }

        reports.lock().push(ComponentReport {
            name: component.name.clone(),
            critical: component.options.critical,
            outcome,
            elapsed,
        });
    }
}

async fn wait_for_termination_signal() -> Result<&'static str, ShutdownError> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                Ok("SIGINT")
            }
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("ctrl-c")
    }
}

/// Shutdown error types
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    /// Shutdown already in progress
    #[error("Shutdown already in progress")]
    AlreadyShuttingDown,

    /// A component with this name is already registered
    #[error("Shutdown component '{0}' is already registered")]
    DuplicateComponent(String),

    /// Signal hooks could not be installed
    #[error("Failed to install signal handler: {0}")]
    SignalHandler(#[from] std::io::Error),
}
