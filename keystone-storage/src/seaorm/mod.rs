//! SeaORM implementation of the Keystone storage layer
//!
//! Connection management, entities and migrations.

pub mod config;
pub mod connection;
pub mod entities;
pub mod migrations;

pub use config::DatabaseConfig;
pub use connection::{DatabaseConnection, DatabaseError};
pub use entities::*;
pub use migrations::Migrator;

// Re-export common SeaORM types for convenience
pub use sea_orm::{ConnectionTrait, DatabaseConnection as SeaOrmConnection, EntityTrait, QueryFilter};
pub use sea_orm_migration::MigratorTrait;
