//! Bounded log of supervisory cycle outcomes

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use uuid::Uuid;

use super::{HealthCheckResult, RepairOutcome, RepairResult};

/// Outcome of one supervisory cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealingReportEntry {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub health: HealthCheckResult,
    pub repairs: Vec<RepairOutcome>,
}

impl HealingReportEntry {
    /// Repairs that ran and did not fix their issue
    pub fn failed_repairs(&self) -> impl Iterator<Item = &RepairOutcome> {
        self.repairs.iter().filter(|r| r.result == RepairResult::Failed)
    }
}

/// Append-only, bounded report. The oldest entries are evicted once the
/// capacity is reached.
#[derive(Debug)]
pub struct HealingReport {
    capacity: usize,
    entries: Mutex<VecDeque<HealingReportEntry>>,
}

impl HealingReport {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn append(&self, entry: HealingReportEntry) {
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Entries from oldest to newest
    pub fn entries(&self) -> Vec<HealingReportEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<HealingReportEntry> {
        self.entries.lock().back().cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Number of most recent consecutive cycles in which `issue_id` was
    /// detected and not successfully repaired.
    pub fn consecutive_failures(&self, issue_id: &str) -> usize {
        self.entries
            .lock()
            .iter()
            .rev()
            .take_while(|entry| {
                let detected = entry.health.issues.iter().any(|i| i.id == issue_id);
                let repaired = entry
                    .repairs
                    .iter()
                    .any(|r| r.issue_id == issue_id && r.result == RepairResult::Success);
                detected && !repaired
            })
            .count()
    }
}
