//! Loadfleet CLI entry point.

use anyhow::Context;
use clap::Parser;

use loadfleet::cli::{commands, handle_error, Cli, Commands};
use loadfleet::infrastructure::config::ConfigLoader;
use loadfleet::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    if let Err(err) = run(cli).await {
        handle_error(err, json);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ConfigLoader::load_with(cli.config.as_deref())?;

    let mut log_config = LogConfig::try_from(&config.logging)?;
    // Keep stdout clean for machine-readable output.
    if cli.json {
        log_config.enable_stdout = false;
    }
    let _logger = LoggerImpl::init(&log_config).context("Failed to initialize logging")?;

    match cli.command {
        Commands::Agent(args) => commands::agent::execute(args, &config, cli.json).await,
        Commands::Failures(args) => commands::failures::execute(args, &config, cli.json).await,
        Commands::Config(args) => commands::config::execute(&args, &config, cli.json),
    }
}
