//! Run worker processes on this host under health supervision.
//!
//! Failures go to a local collector, so a single host can run a supervised
//! load test without a separate coordinator.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use tokio::process::Command;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::application::{HealthSupervisor, ManagedWorker, SupervisorSettings, WorkerProcessManager};
use crate::domain::models::{Config, WorkerKind, WorkerSettings};
use crate::domain::ports::FailureReporter;
use crate::infrastructure::persistence::FailureStore;
use crate::infrastructure::process::OsWorkerProcess;
use crate::infrastructure::scratch::ScratchDir;
use crate::services::{ComponentRegistry, FailureCollector};

/// Environment variable carrying a worker's id into its process.
pub const WORKER_ID_ENV: &str = "LOADFLEET_WORKER_ID";

/// Environment variable carrying the scratch directory into a worker.
pub const SCRATCH_DIR_ENV: &str = "LOADFLEET_SCRATCH_DIR";

#[derive(Args, Debug)]
pub struct AgentArgs {
    #[command(subcommand)]
    pub command: AgentCommand,
}

#[derive(Subcommand, Debug)]
pub enum AgentCommand {
    /// Spawn workers and supervise them until they exit, a critical failure
    /// occurs or the agent is interrupted
    Run {
        /// Shell command for one worker; repeat for more workers
        #[arg(long = "worker", required = true)]
        workers: Vec<String>,

        /// Kind of every spawned worker (member or client)
        #[arg(long, default_value = "member")]
        kind: WorkerKind,

        /// Version of the system under test
        #[arg(long, default_value = "local")]
        version_spec: String,

        /// Override supervisor.scratch_dir
        #[arg(long)]
        scratch_dir: Option<PathBuf>,

        /// Override coordinator.output_dir
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

pub async fn execute(args: AgentArgs, config: &Config, json_mode: bool) -> Result<()> {
    match args.command {
        AgentCommand::Run {
            workers,
            kind,
            version_spec,
            scratch_dir,
            output_dir,
        } => {
            let mut config = config.clone();
            if let Some(dir) = scratch_dir {
                config.supervisor.scratch_dir = dir;
            }
            if let Some(dir) = output_dir {
                config.coordinator.output_dir = dir;
            }
            run(&config, &workers, kind, &version_spec, json_mode).await
        }
    }
}

async fn run(
    config: &Config,
    commands: &[String],
    kind: WorkerKind,
    version_spec: &str,
    json_mode: bool,
) -> Result<()> {
    let endpoint = config.supervisor.agent_endpoint.clone();
    let scratch = ScratchDir::new(&config.supervisor.scratch_dir);
    tokio::fs::create_dir_all(scratch.path())
        .await
        .with_context(|| format!("Failed to create scratch dir {}", scratch.path().display()))?;

    let store = FailureStore::create_run(&config.coordinator.output_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create run directory under {}",
                config.coordinator.output_dir.display()
            )
        })?;
    let run_dir = store.dir().to_path_buf();

    let registry = Arc::new(ComponentRegistry::new());
    let collector = Arc::new(FailureCollector::with_store(
        store,
        config.coordinator.non_critical_set(),
    ));
    let processes = Arc::new(WorkerProcessManager::new());

    let agent = registry.add_agent(endpoint.as_str(), endpoint.as_str()).await;
    let records = registry
        .add_workers(
            agent.address(),
            commands
                .iter()
                .map(|_| WorkerSettings::new(kind, version_spec))
                .collect(),
        )
        .await?;

    for (record, script) in records.iter().zip(commands) {
        let worker_id = record.address.to_string();
        // Ids repeat across runs; a marker left by an earlier run is stale.
        let stale = scratch
            .clear_oome_marker(&worker_id)
            .await
            .with_context(|| format!("Failed to clear oome marker of {worker_id}"))?;
        if stale {
            warn!(worker_id = %worker_id, "removed stale oome marker");
        }
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(script)
            .env(WORKER_ID_ENV, &worker_id)
            .env(SCRATCH_DIR_ENV, scratch.path());
        let process = OsWorkerProcess::spawn(&mut command)
            .with_context(|| format!("Failed to spawn worker {worker_id}: {script}"))?;
        processes
            .register(ManagedWorker::new(worker_id, record.address, Box::new(process)))
            .await;
    }

    let settings = SupervisorSettings::from_config(&config.supervisor, agent.address());
    let poll_interval = settings.interval;
    let supervisor = Arc::new(HealthSupervisor::new(
        settings,
        scratch,
        Arc::clone(&processes),
        Arc::clone(&registry),
        Arc::clone(&collector) as Arc<dyn FailureReporter>,
    ));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = Arc::clone(&supervisor).start(shutdown_rx);

    let mut abort = collector.abort_signal();
    let mut poll = tokio::time::interval(poll_interval);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                warn!("interrupted, stopping workers");
                break;
            }
            changed = abort.changed() => {
                if changed.is_err() || *abort.borrow() {
                    warn!("critical failure detected, aborting run");
                    break;
                }
            }
            _ = poll.tick() => {
                if processes.all_exited().await {
                    info!("all workers exited");
                    break;
                }
            }
        }
    }

    // Pick up exits and exception files that landed after the last tick.
    if let Err(e) = supervisor.run_pass().await {
        warn!(error = %e, "final supervision pass failed");
    }
    // The supervisor may already have stopped; nothing to do then.
    let _ = shutdown_tx.send(());
    handle.await.context("health supervisor task failed")?;

    let killed = processes.kill_all().await;
    if killed > 0 {
        info!(count = killed, "remaining worker processes stopped");
    }

    let summary = collector.summary().await;
    if json_mode {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "workers": commands.len(),
                "failures": summary.total,
                "critical": summary.critical,
                "run_dir": run_dir,
            }))?
        );
    } else {
        println!(
            "{} worker(s), {} failure(s), {} critical, records in {}",
            commands.len(),
            summary.total,
            summary.critical,
            run_dir.display()
        );
    }

    collector.log_failure_info().await?;
    Ok(())
}
