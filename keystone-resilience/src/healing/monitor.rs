//! Health probing

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{HealthCheckResult, HealthIssue};

/// Probe for one aspect of a dependency's health.
///
/// Returning `Err` means the probe itself could not run; the monitor turns
/// that into a critical issue named `<probe>.probe`.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probe name, used as a prefix for probe failure issues
    fn name(&self) -> &str;

    /// Detect problems. An empty list means healthy.
    async fn probe(&self) -> anyhow::Result<Vec<HealthIssue>>;
}

/// Runs registered probes and classifies the dependency's health
#[derive(Clone)]
pub struct HealthMonitor {
    probes: Vec<Arc<dyn HealthProbe>>,
    probe_timeout: Duration,
}

impl HealthMonitor {
    pub fn new(probe_timeout: Duration) -> Self {
        Self {
            probes: Vec::new(),
            probe_timeout,
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.register(probe);
        self
    }

    pub fn register(&mut self, probe: Arc<dyn HealthProbe>) {
        self.probes.push(probe);
    }

    pub fn probe_names(&self) -> Vec<String> {
        self.probes.iter().map(|p| p.name().to_string()).collect()
    }

    /// Run every probe in registration order, each bounded by the probe timeout
    pub async fn check(&self) -> HealthCheckResult {
        let mut issues = Vec::new();

        for probe in &self.probes {
            match timeout(self.probe_timeout, probe.probe()).await {
                Ok(Ok(found)) => {
                    debug!(probe = probe.name(), issues = found.len(), "Probe finished");
                    issues.extend(found);
                }
                Ok(Err(e)) => {
                    warn!(probe = probe.name(), error = %e, "Health probe failed");
                    issues.push(HealthIssue::critical(
                        format!("{}.probe", probe.name()),
                        format!("probe failed: {:#}", e),
                    ));
                }
                Err(_) => {
                    warn!(
                        probe = probe.name(),
                        timeout_ms = self.probe_timeout.as_millis() as u64,
                        "Health probe timed out"
                    );
                    issues.push(HealthIssue::critical(
                        format!("{}.probe", probe.name()),
                        format!("probe timed out after {:?}", self.probe_timeout),
                    ));
                }
            }
        }

        HealthCheckResult::from_issues(issues)
    }
}
