use anyhow::{Context, Result};
use clap::Parser;
use keystone_config::{ConfigLoader, KeystoneConfig, LogLevel};
use keystone_logging::init_logging_from_config;
use keystone_runtime::ResilienceContext;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "Keystone resilience runtime", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    /// Print a sample configuration file and exit
    #[arg(long)]
    print_sample_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.print_sample_config {
        println!("{}", KeystoneConfig::generate_sample());
        return Ok(());
    }

    let mut config = ConfigLoader::new()
        .load(cli.config.as_ref())
        .context("Failed to load configuration")?;

    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    init_logging_from_config(&config.logging)?;

    let context = ResilienceContext::bootstrap(config).await?;
    let exit_code = context.run_until_shutdown().await?;

    tracing::info!(exit_code, "Keystone stopped");
    std::process::exit(exit_code);
}
