//! Configuration inspection commands.

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::domain::models::Config;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration after all merging
    Show,
}

pub fn execute(args: &ConfigArgs, config: &Config, json_mode: bool) -> Result<()> {
    match args.command {
        ConfigCommand::Show => {
            if json_mode {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                print!("{}", serde_yaml::to_string(config)?);
            }
            Ok(())
        }
    }
}
