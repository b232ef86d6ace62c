//! Health probes and repair actions for the storage layer

use async_trait::async_trait;
use keystone_resilience::healing::{HealthIssue, HealthProbe, RepairAction};
use tracing::info;

use crate::ledger::IdempotencyLedger;
use crate::seaorm::DatabaseConnection;

pub const DATABASE_CONNECTIVITY: &str = "database.connectivity";
pub const DATABASE_RECONNECT: &str = "database.reconnect";
pub const LEDGER_EXPIRED_BACKLOG: &str = "ledger.expired_backlog";
pub const LEDGER_PURGE_EXPIRED: &str = "ledger.purge_expired";

/// Pings the database
pub struct DatabaseConnectivityProbe {
    db: DatabaseConnection,
}

impl DatabaseConnectivityProbe {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl HealthProbe for DatabaseConnectivityProbe {
    fn name(&self) -> &str {
        "database"
    }

    async fn probe(&self) -> anyhow::Result<Vec<HealthIssue>> {
        match self.db.ping().await {
            Ok(()) => Ok(Vec::new()),
            Err(e) => Ok(vec![HealthIssue::critical(
                DATABASE_CONNECTIVITY,
                format!("database ping failed: {}", e),
            )
            .with_repair(DATABASE_RECONNECT)]),
        }
    }
}

/// Flags a backlog of expired ledger records
pub struct ExpiredRecordsProbe {
    ledger: IdempotencyLedger,
    threshold: u64,
}

impl ExpiredRecordsProbe {
    /// Reports an issue once more than `threshold` records have expired
    pub fn new(ledger: IdempotencyLedger, threshold: u64) -> Self {
        Self { ledger, threshold }
    }
}

#[async_trait]
impl HealthProbe for ExpiredRecordsProbe {
    fn name(&self) -> &str {
        "ledger"
    }

    async fn probe(&self) -> anyhow::Result<Vec<HealthIssue>> {
        let expired = self.ledger.count_expired().await?;
        if expired <= self.threshold {
            return Ok(Vec::new());
        }

        Ok(vec![HealthIssue::warning(
            LEDGER_EXPIRED_BACKLOG,
            format!("{} expired idempotency records (threshold {})", expired, self.threshold),
        )
        .with_repair(LEDGER_PURGE_EXPIRED)])
    }
}

/// Replaces the connection pool and verifies it answers
pub struct ReconnectRepair {
    db: DatabaseConnection,
}

impl ReconnectRepair {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RepairAction for ReconnectRepair {
    fn name(&self) -> &str {
        DATABASE_RECONNECT
    }

    async fn repair(&self, _issue: &HealthIssue) -> anyhow::Result<()> {
        self.db.reconnect().await?;
        self.db.ping().await?;
        Ok(())
    }
}

pub struct PurgeExpiredRepair {
    ledger: IdempotencyLedger,
}

impl PurgeExpiredRepair {
    pub fn new(ledger: IdempotencyLedger) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl RepairAction for PurgeExpiredRepair {
    fn name(&self) -> &str {
        LEDGER_PURGE_EXPIRED
    }

    async fn repair(&self, _issue: &HealthIssue) -> anyhow::Result<()> {
        let purged = self.ledger.purge_expired().await?;
        info!(purged, "Expired ledger backlog purged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seaorm::entities::idempotency_records;
    use crate::seaorm::DatabaseConfig;
    use chrono::Utc;
    use keystone_resilience::healing::IssueSeverity;
    use sea_orm::{ActiveModelTrait, Set};

    async fn database() -> DatabaseConnection {
        DatabaseConnection::connect_and_migrate(DatabaseConfig::in_memory())
            .await
            .unwrap()
    }

    async fn expire(db: &DatabaseConnection, count: usize) {
        let past = Utc::now() - chrono::Duration::days(1);
        for i in 0..count {
            idempotency_records::ActiveModel {
                request_id: Set(format!("req-{}", i)),
                operation_hash: Set("hash".to_string()),
                result: Set("null".to_string()),
                completed_at: Set(Some(past)),
                expires_at: Set(past),
            }
            .insert(&db.get_connection())
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn test_connectivity_probe_healthy() {
        let probe = DatabaseConnectivityProbe::new(database().await);
        assert!(probe.probe().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connectivity_probe_reports_and_reconnect_repairs() {
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseConnection::connect_and_migrate(DatabaseConfig {
            url: format!("sqlite://{}?mode=rwc", dir.path().join("keystone.db").display()),
            ..DatabaseConfig::default()
        })
        .await
        .unwrap();
        db.close().await.unwrap();

        let issues = DatabaseConnectivityProbe::new(db.clone()).probe().await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].id, DATABASE_CONNECTIVITY);
        assert_eq!(issues[0].severity, IssueSeverity::Critical);
        assert_eq!(issues[0].repair.as_deref(), Some(DATABASE_RECONNECT));

        ReconnectRepair::new(db.clone()).repair(&issues[0]).await.unwrap();
        assert!(db.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_reconnect_repair_fails_rather_than_wiping_in_memory_ledger() {
        let db = database().await;
        let ledger = IdempotencyLedger::new(db.clone());
        ledger.mark_completed("req-1", "hash-A", &"posted").await.unwrap();

        let issue = HealthIssue::critical(DATABASE_CONNECTIVITY, "ping failed").with_repair(DATABASE_RECONNECT);
        assert!(ReconnectRepair::new(db.clone()).repair(&issue).await.is_err());

        assert!(ledger.is_duplicate("req-1", "hash-A").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_probe_threshold_and_purge() {
        let db = database().await;
        let ledger = IdempotencyLedger::new(db.clone());
        expire(&db, 3).await;

        let lenient = ExpiredRecordsProbe::new(ledger.clone(), 3);
        assert!(lenient.probe().await.unwrap().is_empty());

        let strict = ExpiredRecordsProbe::new(ledger.clone(), 2);
        let issues = strict.probe().await.unwrap();
        assert_eq!(issues[0].id, LEDGER_EXPIRED_BACKLOG);
        assert_eq!(issues[0].severity, IssueSeverity::Warning);

        PurgeExpiredRepair::new(ledger.clone()).repair(&issues[0]).await.unwrap();
        assert!(strict.probe().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_probe_fails_without_database() {
        let db = database().await;
        let probe = ExpiredRecordsProbe::new(IdempotencyLedger::new(db.clone()), 0);
        db.close().await.unwrap();

        assert!(probe.probe().await.is_err());
    }
}
