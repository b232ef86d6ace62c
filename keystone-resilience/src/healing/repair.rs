//! Bounded automatic repair of detected issues

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use super::{HealthIssue, RepairOutcome, RepairResult};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
use crate::retry::RetryPolicy;

/// A named corrective action, e.g. reconnecting or compacting storage.
///
/// Repairs talk to the same possibly-unhealthy dependency they are fixing,
/// so they should be safe to run more than once.
#[async_trait]
pub trait RepairAction: Send + Sync {
    /// Name referenced by [`HealthIssue::repair`]
    fn name(&self) -> &str;

    async fn repair(&self, issue: &HealthIssue) -> anyhow::Result<()>;
}

struct RegisteredRepair {
    action: Arc<dyn RepairAction>,
    breaker: CircuitBreaker,
}

/// Maps issues to repair actions and runs them under retry and circuit
/// breaker discipline.
///
/// Each action gets its own breaker. A repair attempt makes up to
/// `retry.max_retries + 1` invocations, each one a breaker call, so a repair
/// that keeps failing opens its circuit and is skipped until the open
/// duration has passed.
pub struct AutoRepair {
    actions: HashMap<String, RegisteredRepair>,
    retry: RetryPolicy,
    breaker_config: CircuitBreakerConfig,
}

impl AutoRepair {
    pub fn new(retry: RetryPolicy, breaker_config: CircuitBreakerConfig) -> Self {
        Self {
            actions: HashMap::new(),
            retry,
            breaker_config,
        }
    }

    pub fn with_action(mut self, action: Arc<dyn RepairAction>) -> Self {
        self.register(action);
        self
    }

    /// Register an action; a later registration with the same name replaces
    /// the earlier one
    pub fn register(&mut self, action: Arc<dyn RepairAction>) {
        let name = action.name().to_string();
        let breaker = CircuitBreaker::new(format!("repair:{}", name), self.breaker_config.clone());
        self.actions.insert(name, RegisteredRepair { action, breaker });
    }

    pub fn action_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Breaker guarding a registered action
    pub fn breaker(&self, action: &str) -> Option<&CircuitBreaker> {
        self.actions.get(action).map(|r| &r.breaker)
    }

    /// Try to repair one issue
    pub async fn attempt(&self, issue: &HealthIssue) -> RepairOutcome {
        let Some(action_name) = issue.repair.as_deref() else {
            return skipped(issue, "none", "no repair action for this issue");
        };

        let Some(registered) = self.actions.get(action_name) else {
            warn!(issue = %issue.id, action = action_name, "Unknown repair action");
            return skipped(issue, action_name, "repair action is not registered");
        };

        let attempts = AtomicU32::new(0);
        let result = self
            .retry
            .retry_with_breaker(&registered.breaker, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                registered.action.repair(issue)
            })
            .await;
        let attempts = attempts.into_inner();

        let (result, detail) = match result {
            Ok(()) => {
                info!(issue = %issue.id, action = action_name, attempts, "Repair succeeded");
                (RepairResult::Success, None)
            }
            Err(CircuitBreakerError::Open { .. }) => {
                warn!(issue = %issue.id, action = action_name, "Repair skipped, circuit open");
                (RepairResult::Skipped, Some("repair circuit is open".to_string()))
            }
            Err(CircuitBreakerError::Operation(e)) => {
                warn!(issue = %issue.id, action = action_name, attempts, error = %e, "Repair failed");
                (RepairResult::Failed, Some(format!("{:#}", e)))
            }
        };

        RepairOutcome {
            issue_id: issue.id.clone(),
            action: action_name.to_string(),
            result,
            attempts,
            detail,
            at: Utc::now(),
        }
    }
}

fn skipped(issue: &HealthIssue, action: &str, reason: &str) -> RepairOutcome {
    RepairOutcome {
        issue_id: issue.id.clone(),
        action: action.to_string(),
        result: RepairResult::Skipped,
        attempts: 0,
        detail: Some(reason.to_string()),
        at: Utc::now(),
    }
}
