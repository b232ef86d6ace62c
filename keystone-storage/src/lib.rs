//! Persistence for Keystone
//!
//! SeaORM connection management and migrations, the idempotency ledger, and
//! the storage health probes and repairs used by the self-healing supervisor.

pub mod health;
pub mod ledger;
pub mod seaorm;

pub use health::{DatabaseConnectivityProbe, ExpiredRecordsProbe, PurgeExpiredRepair, ReconnectRepair};
pub use ledger::{operation_hash, IdempotencyLedger, LedgerError, WritePolicy, DEFAULT_TTL};
pub use seaorm::{DatabaseConfig, DatabaseConnection, DatabaseError};
