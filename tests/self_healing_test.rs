//! Self-healing cycles against a real SQLite database

use anyhow::Result;
use async_trait::async_trait;
use keystone_config::KeystoneConfig;
use keystone_resilience::{
    CircuitBreakerConfig, CycleOutcome, HealthIssue, HealthProbe, HealthStatus, RepairAction, RepairResult,
    RetryPolicy, SelfHealingSupervisor,
};
use keystone_runtime::ResilienceContext;
use keystone_storage::health::{DATABASE_CONNECTIVITY, DATABASE_RECONNECT, LEDGER_EXPIRED_BACKLOG};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn file_config(dir: &TempDir) -> KeystoneConfig {
    let mut config = KeystoneConfig::default();
    config.database.url = format!("sqlite://{}?mode=rwc", dir.path().join("keystone.db").display());
    config.healing.interval = Duration::from_secs(3600);
    config.healing.repair_base_delay = Duration::from_millis(1);
    config
}

async fn completed_cycle(supervisor: &SelfHealingSupervisor) -> keystone_resilience::HealingReportEntry {
    match supervisor.run_cycle().await {
        CycleOutcome::Completed(entry) => entry,
        CycleOutcome::Skipped => panic!("cycle unexpectedly skipped"),
    }
}

#[tokio::test]
async fn test_lost_database_is_reconnected() -> Result<()> {
    let dir = TempDir::new()?;
    let context = ResilienceContext::bootstrap(file_config(&dir)).await?;
    let supervisor = context.supervisor().expect("healing enabled").clone();

    let healthy = completed_cycle(&supervisor).await;
    assert_eq!(healthy.health.status, HealthStatus::Healthy);
    assert!(healthy.repairs.is_empty());

    context.database().close().await?;
    assert!(context.database().ping().await.is_err());

    let entry = completed_cycle(&supervisor).await;
    assert_eq!(entry.health.status, HealthStatus::Unhealthy);
    let repair = entry
        .repairs
        .iter()
        .find(|r| r.issue_id == DATABASE_CONNECTIVITY)
        .expect("connectivity repair");
    assert_eq!(repair.action, DATABASE_RECONNECT);
    assert_eq!(repair.result, RepairResult::Success);

    assert!(context.database().ping().await.is_ok());
    assert_eq!(supervisor.report().len(), 2);
    assert_eq!(supervisor.report().consecutive_failures(DATABASE_CONNECTIVITY), 0);
    Ok(())
}

#[tokio::test]
async fn test_expired_backlog_is_purged() -> Result<()> {
    let dir = TempDir::new()?;
    let mut config = file_config(&dir);
    config.healing.expired_records_threshold = 0;
    let context = ResilienceContext::bootstrap(config).await?;
    let supervisor = context.supervisor().expect("healing enabled").clone();

    let ledger = context.ledger();
    ledger
        .mark_completed_with_ttl("req-old", "hash", &"done", Duration::from_millis(1))
        .await?;
    ledger.mark_completed("req-live", "hash", &"done").await?;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(ledger.count_expired().await?, 1);

    let entry = completed_cycle(&supervisor).await;
    assert_eq!(entry.health.status, HealthStatus::Degraded);
    assert_eq!(entry.repairs.len(), 1);
    assert_eq!(entry.repairs[0].issue_id, LEDGER_EXPIRED_BACKLOG);
    assert_eq!(entry.repairs[0].result, RepairResult::Success);

    assert_eq!(ledger.count_expired().await?, 0);
    assert!(ledger.record("req-old").await?.is_none());
    assert!(ledger.is_duplicate("req-live", "hash").await?);
    Ok(())
}

/// Reports the same unrepairable issue every cycle
struct StuckReplicaProbe;

#[async_trait]
impl HealthProbe for StuckReplicaProbe {
    fn name(&self) -> &str {
        "replica"
    }

    async fn probe(&self) -> Result<Vec<HealthIssue>> {
        Ok(vec![
            HealthIssue::critical("replica.lag", "replica is 40 minutes behind").with_repair("replica.resync")
        ])
    }
}

struct FailingResync {
    invocations: AtomicU32,
}

#[async_trait]
impl RepairAction for FailingResync {
    fn name(&self) -> &str {
        "replica.resync"
    }

    async fn repair(&self, _issue: &HealthIssue) -> Result<()> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Err(anyhow::anyhow!("replica refused resync"))
    }
}

#[tokio::test]
async fn test_repeatedly_failing_repair_is_isolated_by_its_breaker() {
    let resync = Arc::new(FailingResync {
        invocations: AtomicU32::new(0),
    });
    let supervisor = SelfHealingSupervisor::builder()
        .repair_retry(RetryPolicy::new(1, Duration::from_millis(1)))
        .repair_breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            success_threshold: 1,
            open_duration: Duration::from_secs(300),
        })
        .with_probe(Arc::new(StuckReplicaProbe))
        .with_repair(resync.clone())
        .build();

    let mut results = Vec::new();
    for _ in 0..3 {
        let entry = completed_cycle(&supervisor).await;
        results.push((entry.repairs[0].result, entry.repairs[0].attempts));
    }

    assert_eq!(
        results,
        vec![
            (RepairResult::Failed, 2),
            (RepairResult::Skipped, 0),
            (RepairResult::Skipped, 0),
        ]
    );
    assert_eq!(resync.invocations.load(Ordering::SeqCst), 2);
    assert_eq!(supervisor.report().consecutive_failures("replica.lag"), 3);
    assert_eq!(supervisor.report().latest().unwrap().failed_repairs().count(), 0);
}
