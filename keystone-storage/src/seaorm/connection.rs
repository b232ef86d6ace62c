use super::config::DatabaseConfig;
use parking_lot::RwLock;
use sea_orm::{ConnectOptions, Database, DatabaseConnection as SeaConnection, DbErr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Database connection wrapper with configuration.
///
/// Clones share the underlying pool. [`DatabaseConnection::reconnect`] swaps
/// the pool for every clone at once.
#[derive(Clone)]
pub struct DatabaseConnection {
    connection: Arc<RwLock<SeaConnection>>,
    config: DatabaseConfig,
}

/// Database-related errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database error: {0}")]
    DbError(#[from] DbErr),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl DatabaseConnection {
    /// Create a new database connection with configuration
    pub async fn new(config: DatabaseConfig) -> Result<Self, DatabaseError> {
        let connection = Self::open(&config).await?;
        Ok(Self {
            connection: Arc::new(RwLock::new(connection)),
            config,
        })
    }

    /// Connect and bring the schema up to date
    pub async fn connect_and_migrate(config: DatabaseConfig) -> Result<Self, DatabaseError> {
        let db = Self::new(config).await?;
        db.migrate().await?;
        Ok(db)
    }

    async fn open(config: &DatabaseConfig) -> Result<SeaConnection, DatabaseError> {
        info!("Connecting to database: {}", config.url);

        Self::ensure_sqlite_file_exists(&config.url)?;

        let mut opts = ConnectOptions::new(&config.url);
        opts.connect_timeout(config.connection_timeout)
            .acquire_timeout(config.connection_timeout)
            .sqlx_logging(true)
            .sqlx_logging_level(log::LevelFilter::Debug);

        if config.is_in_memory() {
            // Every pooled connection to `:memory:` is its own database, and
            // recycling the only connection would drop all data
            opts.max_connections(1).min_connections(1);
        } else {
            opts.max_connections(config.max_connections)
                .min_connections(1)
                .idle_timeout(Duration::from_secs(300))
                .max_lifetime(Duration::from_secs(3600));
        }

        let connection = Database::connect(opts).await?;

        debug!(
            "Database connection established with {} max connections",
            config.max_connections
        );

        Ok(connection)
    }

    /// Ensure the parent directory of a file-based SQLite database exists
    fn ensure_sqlite_file_exists(database_url: &str) -> Result<(), DatabaseError> {
        if !database_url.starts_with("sqlite:") {
            debug!("Non-SQLite database detected, skipping file creation logic");
            return Ok(());
        }
        if database_url.contains(":memory:") {
            debug!("Using in-memory SQLite database");
            return Ok(());
        }

        let without_scheme = database_url
            .strip_prefix("sqlite://")
            .or_else(|| database_url.strip_prefix("sqlite:"))
            .ok_or_else(|| DatabaseError::ConfigError(format!("Invalid SQLite URL format: {}", database_url)))?;
        let file_path = without_scheme.split('?').next().unwrap_or(without_scheme);
        if file_path.is_empty() {
            return Err(DatabaseError::ConfigError(format!(
                "SQLite URL has no file path: {}",
                database_url
            )));
        }

        let path = std::path::Path::new(file_path);
        if let Some(parent_dir) = path.parent() {
            if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
                info!("Creating database directory: {:?}", parent_dir);
                std::fs::create_dir_all(parent_dir).map_err(|e| {
                    DatabaseError::ConfigError(format!(
                        "Failed to create database directory {:?}: {}",
                        parent_dir, e
                    ))
                })?;
            }
        }

        Ok(())
    }

    /// Current Sea-ORM connection. The handle stays valid until the next
    /// reconnect.
    pub fn get_connection(&self) -> SeaConnection {
        self.connection.read().clone()
    }

    /// Get database configuration
    pub fn get_config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        use sea_orm_migration::MigratorTrait;

        info!("Running database migrations");

        super::migrations::Migrator::up(&self.get_connection(), None)
            .await
            .map_err(|e| DatabaseError::MigrationError(e.to_string()))?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Check database connectivity
    pub async fn ping(&self) -> Result<(), DatabaseError> {
        match self.get_connection().ping().await {
            Ok(_) => {
                debug!("Database ping successful");
                Ok(())
            }
            Err(e) => {
                debug!("Database ping failed: {}", e);
                Err(DatabaseError::DbError(e))
            }
        }
    }

    /// Replace the pool with a fresh one and re-run migrations. The old pool
    /// is closed once the new one is in place.
    ///
    /// In-memory databases are refused: a new pool would be a new, empty
    /// database.
    pub async fn reconnect(&self) -> Result<(), DatabaseError> {
        if self.config.is_in_memory() {
            return Err(DatabaseError::ConfigError(
                "in-memory database cannot be reconnected without losing its contents".to_string(),
            ));
        }

        info!("Reconnecting to database");

        let fresh = Self::open(&self.config).await?;
        {
            use sea_orm_migration::MigratorTrait;
            super::migrations::Migrator::up(&fresh, None)
                .await
                .map_err(|e| DatabaseError::MigrationError(e.to_string()))?;
        }

        let stale = std::mem::replace(&mut *self.connection.write(), fresh);
        if let Err(e) = stale.close().await {
            warn!("Failed to close replaced database pool: {}", e);
        }

        info!("Database reconnected");
        Ok(())
    }

    /// Close the database connection for every clone of this handle
    pub async fn close(&self) -> Result<(), DatabaseError> {
        info!("Closing database connection");
        self.get_connection().close().await?;
        debug!("Database connection closed");
        Ok(())
    }
}
