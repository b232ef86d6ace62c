use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Database configuration for SeaORM
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Connection timeout
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,
}

impl DatabaseConfig {
    /// Config for a private in-memory SQLite database
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            connection_timeout: Duration::from_secs(10),
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:")
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://keystone.db?mode=rwc".to_string(),
            max_connections: 10,
            connection_timeout: Duration::from_secs(30),
        }
    }
}
