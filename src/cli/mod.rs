//! Command-line interface for loadfleet.

pub mod commands;
pub mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::agent::AgentArgs;
use commands::config::ConfigArgs;
use commands::failures::FailuresArgs;

#[derive(Parser, Debug)]
#[command(name = "loadfleet")]
#[command(about = "Fleet coordination for distributed load tests", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Extra configuration file, merged over loadfleet.yaml
    #[arg(short, long, global = true, env = "LOADFLEET_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run worker processes under health supervision
    Agent(AgentArgs),
    /// Inspect persisted failures
    Failures(FailuresArgs),
    /// Inspect configuration
    Config(ConfigArgs),
}

/// Print an error and exit non-zero.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let body = serde_json::json!({
            "error": err.to_string(),
            "chain": err.chain().skip(1).map(ToString::to_string).collect::<Vec<_>>(),
        });
        eprintln!("{body}");
    } else {
        eprintln!("Error: {err}");
        for cause in err.chain().skip(1) {
            eprintln!("  caused by: {cause}");
        }
    }
    std::process::exit(1);
}
