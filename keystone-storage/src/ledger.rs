//! Idempotency ledger
//!
//! Makes at-least-once invoked operations at-most-once effective: callers
//! check [`IdempotencyLedger::is_duplicate`] before doing work and record it
//! with [`IdempotencyLedger::mark_completed`] afterwards.
//!
//! There is no in-process locking. Two concurrent requests with the same id
//! can both pass the duplicate check before either records completion; the
//! primary key on `request_id` only guarantees a single surviving row.

use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::seaorm::entities::idempotency_records;
use crate::seaorm::{DatabaseConnection, IdempotencyRecord, IdempotencyRecords};

/// Records are kept for ten years unless a shorter TTL is given
pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// How `mark_completed` treats a request id that already has a record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// The latest completion replaces the stored hash and result
    #[default]
    Overwrite,
    /// A completed request id is immutable. Re-marking it with the same hash
    /// is a no-op, a different hash is a conflict.
    FirstWriteWins,
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid TTL: {0}")]
    InvalidTtl(String),

    #[error("Request '{request_id}' already completed a different operation")]
    Conflict { request_id: String },
}

/// SHA-256 hex digest of a payload's JSON encoding.
///
/// Stable for structs and sequences. Maps with unspecified iteration order,
/// such as `HashMap`, should be converted to a `BTreeMap` first.
pub fn operation_hash<T: Serialize + ?Sized>(payload: &T) -> Result<String, LedgerError> {
    let bytes = serde_json::to_vec(payload)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

#[derive(Clone)]
pub struct IdempotencyLedger {
    db: DatabaseConnection,
    policy: WritePolicy,
    default_ttl: Duration,
}

impl IdempotencyLedger {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            policy: WritePolicy::default(),
            default_ttl: DEFAULT_TTL,
        }
    }

    pub fn with_policy(mut self, policy: WritePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn policy(&self) -> WritePolicy {
        self.policy
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// True when `request_id` has completed with exactly `operation_hash`.
    /// Expiry is not checked.
    pub async fn is_duplicate(&self, request_id: &str, operation_hash: &str) -> Result<bool, LedgerError> {
        Ok(self.find_completed(request_id, operation_hash).await?.is_some())
    }

    /// Stored result for a completed `(request_id, operation_hash)` pair
    pub async fn completed_result<T: DeserializeOwned>(
        &self,
        request_id: &str,
        operation_hash: &str,
    ) -> Result<Option<T>, LedgerError> {
        match self.find_completed(request_id, operation_hash).await? {
            Some(record) => Ok(Some(serde_json::from_str(&record.result)?)),
            None => Ok(None),
        }
    }

    /// Raw record for a request id, completed or not
    pub async fn record(&self, request_id: &str) -> Result<Option<IdempotencyRecord>, LedgerError> {
        Ok(IdempotencyRecords::find_by_id(request_id.to_string())
            .one(&self.db.get_connection())
            .await?)
    }

    /// Record completion with the ledger's default TTL
    pub async fn mark_completed<T: Serialize + ?Sized>(
        &self,
        request_id: &str,
        operation_hash: &str,
        result: &T,
    ) -> Result<(), LedgerError> {
        self.mark_completed_with_ttl(request_id, operation_hash, result, self.default_ttl)
            .await
    }

    /// Record completion of `request_id`; the record expires `ttl` from now
    pub async fn mark_completed_with_ttl<T: Serialize + ?Sized>(
        &self,
        request_id: &str,
        operation_hash: &str,
        result: &T,
        ttl: Duration,
    ) -> Result<(), LedgerError> {
        if ttl.is_zero() {
            return Err(LedgerError::InvalidTtl("TTL must be greater than zero".to_string()));
        }

        let completed_at = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| completed_at.checked_add_signed(ttl))
            .ok_or_else(|| LedgerError::InvalidTtl(format!("TTL {:?} is out of range", ttl)))?;

        let model = idempotency_records::ActiveModel {
            request_id: Set(request_id.to_string()),
            operation_hash: Set(operation_hash.to_string()),
            result: Set(serde_json::to_string(result)?),
            completed_at: Set(Some(completed_at)),
            expires_at: Set(expires_at),
        };

        match self.policy {
            WritePolicy::Overwrite => self.upsert(model).await?,
            WritePolicy::FirstWriteWins => self.insert_first(request_id, operation_hash, model).await?,
        }

        debug!(request_id, operation_hash, "Marked operation completed");
        Ok(())
    }

    /// Run `op` at most once per `(request_id, operation_hash)`.
    ///
    /// A duplicate returns the stored result without running `op`. Otherwise
    /// `op` runs and its successful result is recorded. Failures are not
    /// recorded, so a failed operation can be retried under the same id.
    pub async fn execute_once<T, F, Fut, E>(&self, request_id: &str, operation_hash: &str, op: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LedgerError>,
    {
        if let Some(stored) = self.completed_result(request_id, operation_hash).await? {
            debug!(request_id, "Duplicate request, returning stored result");
            return Ok(stored);
        }

        let result = op().await?;
        self.mark_completed(request_id, operation_hash, &result).await?;
        Ok(result)
    }

    /// Delete records whose expiry has passed. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<u64, LedgerError> {
        let deleted = IdempotencyRecords::delete_many()
            .filter(idempotency_records::Column::ExpiresAt.lt(Utc::now()))
            .exec(&self.db.get_connection())
            .await?;

        if deleted.rows_affected > 0 {
            info!(rows = deleted.rows_affected, "Purged expired idempotency records");
        }
        Ok(deleted.rows_affected)
    }

    pub async fn count_expired(&self) -> Result<u64, LedgerError> {
        Ok(IdempotencyRecords::find()
            .filter(idempotency_records::Column::ExpiresAt.lt(Utc::now()))
            .count(&self.db.get_connection())
            .await?)
    }

    async fn find_completed(
        &self,
        request_id: &str,
        operation_hash: &str,
    ) -> Result<Option<IdempotencyRecord>, LedgerError> {
        Ok(IdempotencyRecords::find()
            .filter(idempotency_records::Column::RequestId.eq(request_id))
            .filter(idempotency_records::Column::OperationHash.eq(operation_hash))
            .filter(idempotency_records::Column::CompletedAt.is_not_null())
            .one(&self.db.get_connection())
            .await?)
    }

    async fn upsert(&self, model: idempotency_records::ActiveModel) -> Result<(), LedgerError> {
        IdempotencyRecords::insert(model)
            .on_conflict(
                OnConflict::column(idempotency_records::Column::RequestId)
                    .update_columns([
                        idempotency_records::Column::OperationHash,
                        idempotency_records::Column::Result,
                        idempotency_records::Column::CompletedAt,
                        idempotency_records::Column::ExpiresAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db.get_connection())
            .await?;
        Ok(())
    }

    async fn insert_first(
        &self,
        request_id: &str,
        operation_hash: &str,
        model: idempotency_records::ActiveModel,
    ) -> Result<(), LedgerError> {
        if let Some(existing) = self.record(request_id).await? {
            if existing.completed_at.is_none() {
                return self.upsert(model).await;
            }
            return Self::check_same_operation(existing, operation_hash);
        }

        let inserted = IdempotencyRecords::insert(model)
            .on_conflict(
                OnConflict::column(idempotency_records::Column::RequestId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db.get_connection())
            .await?;

        if inserted == 0 {
            // Lost a race with a concurrent writer
            if let Some(existing) = self.record(request_id).await? {
                return Self::check_same_operation(existing, operation_hash);
            }
        }
        Ok(())
    }

    fn check_same_operation(existing: IdempotencyRecord, operation_hash: &str) -> Result<(), LedgerError> {
        if existing.operation_hash == operation_hash {
            Ok(())
        } else {
            Err(LedgerError::Conflict {
                request_id: existing.request_id,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seaorm::DatabaseConfig;
    use sea_orm::ActiveModelTrait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn ledger() -> IdempotencyLedger {
        let db = DatabaseConnection::connect_and_migrate(DatabaseConfig::in_memory())
            .await
            .unwrap();
        IdempotencyLedger::new(db)
    }

    async fn insert_expired(ledger: &IdempotencyLedger, request_id: &str, hash: &str) {
        let past = Utc::now() - chrono::Duration::hours(1);
        idempotency_records::ActiveModel {
            request_id: Set(request_id.to_string()),
            operation_hash: Set(hash.to_string()),
            result: Set("null".to_string()),
            completed_at: Set(Some(past - chrono::Duration::hours(1))),
            expires_at: Set(past),
        }
        .insert(&ledger.db.get_connection())
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_request_is_not_duplicate() {
        let ledger = ledger().await;
        assert!(!ledger.is_duplicate("req-1", "hash-A").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_requires_matching_hash() {
        let ledger = ledger().await;
        ledger.mark_completed("req-1", "hash-A", &json!({"ok": true})).await.unwrap();

        assert!(ledger.is_duplicate("req-1", "hash-A").await.unwrap());
        assert!(!ledger.is_duplicate("req-1", "hash-B").await.unwrap());
        assert!(!ledger.is_duplicate("req-2", "hash-A").await.unwrap());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_previous_operation() {
        let ledger = ledger().await;

        ledger.mark_completed("req-1", "hash-A", &1).await.unwrap();
        ledger.mark_completed("req-1", "hash-B", &2).await.unwrap();

        assert!(!ledger.is_duplicate("req-1", "hash-A").await.unwrap());
        assert!(ledger.is_duplicate("req-1", "hash-B").await.unwrap());
        assert_eq!(ledger.completed_result::<i32>("req-1", "hash-B").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_first_write_wins_rejects_other_operation() {
        let ledger = ledger().await.with_policy(WritePolicy::FirstWriteWins);

        ledger.mark_completed("req-1", "hash-A", &1).await.unwrap();
        // Same operation again is a no-op
        ledger.mark_completed("req-1", "hash-A", &1).await.unwrap();

        let err = ledger.mark_completed("req-1", "hash-B", &2).await.unwrap_err();
        assert!(matches!(err, LedgerError::Conflict { ref request_id } if request_id == "req-1"));

        assert!(ledger.is_duplicate("req-1", "hash-A").await.unwrap());
        assert!(!ledger.is_duplicate("req-1", "hash-B").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_check_ignores_expiry() {
        let ledger = ledger().await;
        insert_expired(&ledger, "req-old", "hash-A").await;

        assert!(ledger.is_duplicate("req-old", "hash-A").await.unwrap());
        assert_eq!(ledger.count_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_purge_expired_keeps_live_records() {
        let ledger = ledger().await;
        insert_expired(&ledger, "req-old", "hash-A").await;
        ledger.mark_completed("req-new", "hash-A", &"done").await.unwrap();

        assert_eq!(ledger.purge_expired().await.unwrap(), 1);
        assert!(ledger.record("req-old").await.unwrap().is_none());
        assert!(ledger.is_duplicate("req-new", "hash-A").await.unwrap());
        assert_eq!(ledger.count_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ttl_sets_expiry() {
        let ledger = ledger().await;
        let before = Utc::now();

        ledger
            .mark_completed_with_ttl("req-1", "hash-A", &(), Duration::from_secs(3600))
            .await
            .unwrap();

        let record = ledger.record("req-1").await.unwrap().unwrap();
        let completed_at = record.completed_at.unwrap();
        assert!(completed_at >= before);
        assert_eq!(record.expires_at - completed_at, chrono::Duration::seconds(3600));
    }

    #[tokio::test]
    async fn test_invalid_ttl_rejected() {
        let ledger = ledger().await;

        let zero = ledger.mark_completed_with_ttl("req-1", "h", &(), Duration::ZERO).await;
        assert!(matches!(zero, Err(LedgerError::InvalidTtl(_))));

        let huge = ledger.mark_completed_with_ttl("req-1", "h", &(), Duration::MAX).await;
        assert!(matches!(huge, Err(LedgerError::InvalidTtl(_))));

        assert!(ledger.record("req-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_execute_once_runs_operation_once() {
        let ledger = ledger().await;
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let total: anyhow::Result<u64> = ledger
                .execute_once("invoice-42", "post-invoice", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(1250)
                })
                .await;
            assert_eq!(total.unwrap(), 1250);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execute_once_does_not_record_failures() {
        let ledger = ledger().await;

        let failed: anyhow::Result<u64> = ledger
            .execute_once("invoice-42", "post-invoice", || async { Err(anyhow::anyhow!("gateway down")) })
            .await;
        assert!(failed.is_err());
        assert!(!ledger.is_duplicate("invoice-42", "post-invoice").await.unwrap());

        let retried: anyhow::Result<u64> = ledger
            .execute_once("invoice-42", "post-invoice", || async { Ok(7) })
            .await;
        assert_eq!(retried.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_closed_database_surfaces_error() {
        let ledger = ledger().await;
        ledger.db.close().await.unwrap();

        let result = ledger.is_duplicate("req-1", "hash-A").await;
        assert!(matches!(result, Err(LedgerError::Database(_))));
    }

    #[test]
    fn test_operation_hash_is_stable_sha256() {
        let a = operation_hash(&json!({"invoice": 42, "amount": "12.50"})).unwrap();
        let b = operation_hash(&json!({"invoice": 42, "amount": "12.50"})).unwrap();
        let c = operation_hash(&json!({"invoice": 43, "amount": "12.50"})).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }
}
