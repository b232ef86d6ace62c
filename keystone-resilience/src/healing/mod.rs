//! Self-healing supervision of a persistent dependency
//!
//! One supervisory cycle runs the [`HealthMonitor`], hands every detected
//! issue to [`AutoRepair`], and appends the outcome to the [`HealingReport`].
//! The [`SelfHealingSupervisor`] drives cycles on a fixed interval and never
//! lets two cycles overlap.
//!
//! Repair failures are recorded, never escalated: persistent problems surface
//! through the report for operators and alerting.

pub mod monitor;
pub mod repair;
pub mod report;
pub mod supervisor;

pub use monitor::{HealthMonitor, HealthProbe};
pub use repair::{AutoRepair, RepairAction};
pub use report::{HealingReport, HealingReportEntry};
pub use supervisor::{CycleOutcome, SelfHealingSupervisor, SupervisorBuilder, SupervisorHandle};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Overall health of the supervised dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    /// Functional, but with warnings worth repairing
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Warning,
    Critical,
}

/// A problem detected by a health probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthIssue {
    /// Stable identifier of the kind of problem, e.g. `database.connectivity`
    pub id: String,
    pub severity: IssueSeverity,
    pub description: String,
    /// Name of the repair action that can fix this issue
    pub repair: Option<String>,
}

impl HealthIssue {
    pub fn new(id: impl Into<String>, severity: IssueSeverity, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            severity,
            description: description.into(),
            repair: None,
        }
    }

    pub fn warning(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(id, IssueSeverity::Warning, description)
    }

    pub fn critical(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(id, IssueSeverity::Critical, description)
    }

    /// Attach the name of the repair action for this issue
    pub fn with_repair(mut self, action: impl Into<String>) -> Self {
        self.repair = Some(action.into());
        self
    }
}

/// Result of one health check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    /// Issues in the order the probes reported them
    pub issues: Vec<HealthIssue>,
    pub checked_at: DateTime<Utc>,
}

impl HealthCheckResult {
    /// Classify a set of issues: any critical issue makes the dependency
    /// unhealthy, warnings alone make it degraded.
    pub fn from_issues(issues: Vec<HealthIssue>) -> Self {
        let status = match issues.iter().map(|i| i.severity).max() {
            None => HealthStatus::Healthy,
            Some(IssueSeverity::Warning) => HealthStatus::Degraded,
            Some(IssueSeverity::Critical) => HealthStatus::Unhealthy,
        };

        Self {
            status,
            issues,
            checked_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairResult {
    Success,
    Failed,
    /// Nothing was attempted: no repair registered, or its circuit is open
    Skipped,
}

/// What happened when repairing one issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairOutcome {
    pub issue_id: String,
    /// Repair action name, or `none` when no action applied
    pub action: String,
    pub result: RepairResult,
    /// Invocations of the repair action during this cycle
    pub attempts: u32,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}
