//! Configuration loading and environment variable handling

use crate::domains::KeystoneConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "KEYSTONE".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<KeystoneConfig> {
        let content = std::fs::read_to_string(path)?;
        self.from_yaml(&content)
    }

    /// Load configuration from YAML text with environment overrides
    pub fn from_yaml(&self, content: &str) -> ConfigResult<KeystoneConfig> {
        let mut config: KeystoneConfig = serde_yaml::from_str(content)?;
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<KeystoneConfig> {
        let mut config = KeystoneConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<KeystoneConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut KeystoneConfig) -> ConfigResult<()> {
        if let Ok(url) = self.get_env_var("DATABASE_URL") {
            config.database.url = url;
        }
        if let Some(max) = self.parse_env_var("DATABASE_MAX_CONNECTIONS")? {
            config.database.max_connections = max;
        }

        if let Some(level) = self.parse_env_var("LOG_LEVEL")? {
            config.logging.level = level;
        }
        if let Some(format) = self.parse_env_var("LOG_FORMAT")? {
            config.logging.format = format;
        }

        if let Some(max_retries) = self.parse_env_var("RETRY_MAX_RETRIES")? {
            config.retry.max_retries = max_retries;
        }
        if let Some(ms) = self.parse_env_var("RETRY_BASE_DELAY_MS")? {
            config.retry.base_delay = Duration::from_millis(ms);
        }

        if let Some(ms) = self.parse_env_var("SHUTDOWN_TIMEOUT_MS")? {
            config.shutdown.timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.parse_env_var("SHUTDOWN_GRACE_PERIOD_MS")? {
            config.shutdown.grace_period = Duration::from_millis(ms);
        }

        if let Some(enabled) = self.parse_env_var("HEALING_ENABLED")? {
            config.healing.enabled = enabled;
        }
        if let Some(secs) = self.parse_env_var("HEALING_INTERVAL_SECS")? {
            config.healing.interval = Duration::from_secs(secs);
        }

        Ok(())
    }

    /// Parse a prefixed variable if it is set
    fn parse_env_var<T>(&self, name: &str) -> ConfigResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get_env_var(name) {
            Ok(value) => value
                .parse()
                .map(Some)
                .map_err(|e| ConfigError::EnvError(format!("Invalid {}_{}: {}", self.prefix, name, e))),
            Err(_) => Ok(None),
        }
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
