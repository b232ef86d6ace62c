use anyhow::{Context, Result};
use keystone_config::{LogFormat, LoggingConfig};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// `EnvFilter` directives for a configuration: the base level followed by
/// any extra per-target directives
pub fn filter_directives(config: &LoggingConfig) -> String {
    match config.filter.as_deref().map(str::trim) {
        Some(extra) if !extra.is_empty() => format!("{},{}", config.level.as_str(), extra),
        _ => config.level.as_str().to_string(),
    }
}

/// Initialize logging from configuration.
///
/// `RUST_LOG`, when set, takes precedence over the configured level. Does
/// nothing if a global subscriber is already installed.
pub fn init_logging_from_config(config: &LoggingConfig) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let directives = filter_directives(config);
            EnvFilter::try_new(&directives).with_context(|| format!("Invalid log filter '{}'", directives))?
        }
    };

    let layer = fmt::layer()
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    let registry = tracing_subscriber::registry().with(env_filter);

    // Use try_init to avoid panic if global subscriber already set
    let result = match config.format {
        LogFormat::Json => registry.with(layer.json()).try_init(),
        LogFormat::Compact => registry.with(layer.compact()).try_init(),
        LogFormat::Pretty => registry.with(layer.pretty()).try_init(),
        LogFormat::Text => registry.with(layer).try_init(),
    };

    if result.is_err() {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}

/// Initialize simple tracing for basic console output
pub fn init_simple_tracing(log_level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_new(log_level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if tracing_subscriber::fmt().with_env_filter(env_filter).try_init().is_err() {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}
