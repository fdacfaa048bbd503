//! Postmortem commands over persisted failure records.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use crate::cli::output::{list_table, render_list};
use crate::domain::models::{Config, Failure, FailureType};
use crate::infrastructure::persistence::FailureStore;
use crate::services::FailureSummary;

#[derive(Args, Debug)]
pub struct FailuresArgs {
    #[command(subcommand)]
    pub command: FailuresCommand,
}

#[derive(Subcommand, Debug)]
pub enum FailuresCommand {
    /// Count failures per type and exit non-zero on critical ones
    Summary {
        /// Run directory (defaults to the latest run under coordinator.output_dir)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// List persisted failures
    List {
        /// Run directory (defaults to the latest run under coordinator.output_dir)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Only show failures of this type, e.g. WORKER_OOM
        #[arg(long = "type")]
        failure_type: Option<FailureType>,
    },
}

pub async fn execute(args: FailuresArgs, config: &Config, json_mode: bool) -> Result<()> {
    match args.command {
        FailuresCommand::Summary { dir } => {
            let failures = load(dir, config).await?;
            summarize(&failures, config, json_mode)
        }
        FailuresCommand::List { dir, failure_type } => {
            let failures = load(dir, config).await?;
            let failures: Vec<Failure> = failures
                .into_iter()
                .filter(|f| failure_type.is_none_or(|t| f.failure_type == t))
                .collect();
            list(&failures, json_mode)
        }
    }
}

/// Load one run's failures: the given directory, else the latest run under
/// the configured output directory.
async fn load(dir: Option<PathBuf>, config: &Config) -> Result<Vec<Failure>> {
    let store = match dir {
        Some(dir) => FailureStore::new(dir),
        None => latest_run(&config.coordinator.output_dir).await?,
    };
    store
        .load_all()
        .await
        .with_context(|| format!("Failed to load failures from {}", store.dir().display()))
}

async fn latest_run(output_dir: &Path) -> Result<FailureStore> {
    let latest = FailureStore::latest_run(output_dir)
        .await
        .with_context(|| format!("Failed to scan runs in {}", output_dir.display()))?;
    // No runs yet: an empty or legacy flat directory.
    Ok(latest.unwrap_or_else(|| FailureStore::new(output_dir)))
}

fn summarize(failures: &[Failure], config: &Config, json_mode: bool) -> Result<()> {
    let non_critical = config.coordinator.non_critical_set();
    let summary = FailureSummary::from_failures(failures, &non_critical);

    if json_mode {
        let counts: serde_json::Map<String, serde_json::Value> = summary
            .counts
            .iter()
            .map(|(t, c)| (t.to_string(), serde_json::Value::from(*c)))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "total": summary.total,
                "critical": summary.critical,
                "counts": counts,
            }))?
        );
    } else {
        let mut table = list_table(&["type", "count", "critical", "description"]);
        for (failure_type, count) in &summary.counts {
            let critical = !non_critical.contains(failure_type);
            table.add_row(vec![
                failure_type.to_string(),
                count.to_string(),
                if critical { "yes" } else { "no" }.to_string(),
                failure_type.description().to_string(),
            ]);
        }
        println!("{}", render_list("failure", &table, summary.total));
    }

    summary.verdict()?;
    Ok(())
}

fn list(failures: &[Failure], json_mode: bool) -> Result<()> {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(failures)?);
        return Ok(());
    }

    let mut table = list_table(&["time", "type", "source", "worker", "test", "message"]);
    for failure in failures {
        table.add_row(vec![
            failure.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            failure.failure_type.to_string(),
            failure.source.to_string(),
            failure.worker_id.clone(),
            failure.test_id.clone().unwrap_or_else(|| "-".to_string()),
            failure.message.clone(),
        ]);
    }
    println!("{}", render_list("failure", &table, failures.len()));
    Ok(())
}
