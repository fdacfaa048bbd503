//! Periodic worker health supervision on an agent.
//!
//! Each pass looks at every worker process the agent owns and at the scratch
//! directory, turns whatever it finds into [`Failure`]s, reports them and
//! reclaims the dead workers from the process table and the registry.
//!
//! # Examples
//!
//! ```ignore
//! let supervisor = Arc::new(HealthSupervisor::new(
//!     settings, scratch, processes, registry, reporter,
//! ));
//! let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
//! let handle = Arc::clone(&supervisor).start(shutdown_rx);
//!
//! // Later
//! shutdown_tx.send(()).ok();
//! handle.await?;
//! ```

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::worker_process_manager::{ManagedWorker, WorkerProcessManager};
use crate::domain::errors::FleetResult;
use crate::domain::models::{Address, Failure, FailureType, SupervisorConfig};
use crate::domain::ports::{ClusterMembership, FailureReporter};
use crate::infrastructure::scratch::ScratchDir;
use crate::services::ComponentRegistry;

/// Identity and cadence of one supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub interval: Duration,
    /// Address failures are attributed to when the worker is unknown.
    pub agent_address: Address,
    /// Endpoint stamped on every reported failure.
    pub agent_endpoint: String,
}

impl SupervisorSettings {
    pub fn from_config(config: &SupervisorConfig, agent_address: Address) -> Self {
        Self {
            interval: Duration::from_millis(config.interval_ms),
            agent_address,
            agent_endpoint: config.agent_endpoint.clone(),
        }
    }
}

/// What one supervision pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Failures emitted, in detection order.
    pub failures: Vec<Failure>,
    /// Workers removed from the process table.
    pub reclaimed: Vec<Address>,
    /// Exception files read and deleted.
    pub exception_files: usize,
}

impl PassReport {
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty() && self.reclaimed.is_empty() && self.exception_files == 0
    }
}

pub struct HealthSupervisor {
    settings: SupervisorSettings,
    scratch: ScratchDir,
    processes: Arc<WorkerProcessManager>,
    registry: Arc<ComponentRegistry>,
    reporter: Arc<dyn FailureReporter>,
    membership: Option<Arc<dyn ClusterMembership>>,
}

impl HealthSupervisor {
    pub fn new(
        settings: SupervisorSettings,
        scratch: ScratchDir,
        processes: Arc<WorkerProcessManager>,
        registry: Arc<ComponentRegistry>,
        reporter: Arc<dyn FailureReporter>,
    ) -> Self {
        Self {
            settings,
            scratch,
            processes,
            registry,
            reporter,
            membership: None,
        }
    }

    /// Enable the membership check. Without a provider it is skipped.
    #[must_use]
    pub fn with_membership(mut self, membership: Arc<dyn ClusterMembership>) -> Self {
        self.membership = Some(membership);
        self
    }

    pub const fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    /// Run passes every `interval` until `shutdown_rx` fires.
    ///
    /// A failed or panicking pass is logged and the loop carries on. The
    /// returned handle belongs to a watchdog that logs if the loop task itself
    /// dies.
    pub fn start(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let supervisor = Arc::clone(&self);
        let agent = self.settings.agent_address;

        let loop_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(supervisor.settings.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            // Skip first tick (fires immediately)
            interval.tick().await;

            info!(
                agent = %agent,
                interval_ms = supervisor.settings.interval.as_millis(),
                scratch_dir = %supervisor.scratch.path().display(),
                "health supervisor started"
            );

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match AssertUnwindSafe(supervisor.run_pass()).catch_unwind().await {
                            Ok(Ok(report)) => {
                                if !report.is_empty() {
                                    debug!(
                                        agent = %agent,
                                        failures = report.failures.len(),
                                        reclaimed = report.reclaimed.len(),
                                        exception_files = report.exception_files,
                                        "health supervision pass completed"
                                    );
                                }
                            }
                            Ok(Err(e)) => {
                                error!(agent = %agent, error = %e, "health supervision pass failed");
                            }
                            Err(panic) => {
                                error!(
                                    agent = %agent,
                                    panic = %panic_message(panic.as_ref()),
                                    "health supervision pass panicked"
                                );
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!(agent = %agent, "received shutdown signal, stopping health supervisor");
                        break;
                    }
                }
            }
        });

        tokio::spawn(async move {
            if let Err(e) = loop_handle.await {
                error!(agent = %agent, error = %e, "health supervisor terminated abnormally");
            }
        })
    }

    /// One supervision pass: process checks, then the exception scan.
    ///
    /// Every detected failure is reported before this returns, including
    /// when the exception scan fails part way.
    pub async fn run_pass(&self) -> FleetResult<PassReport> {
        let mut report = PassReport::default();

        let reclaimed = self.check_processes(&mut report).await;
        for address in &reclaimed {
            self.registry.remove_worker(address).await;
        }

        let scan = self.scan_exceptions(&mut report).await;

        for failure in &report.failures {
            if let Err(e) = self.reporter.report(failure.clone()).await {
                error!(error = %e, failure = %failure, "failed to report failure");
            }
        }

        scan.map(|()| report)
    }

    async fn check_processes(&self, report: &mut PassReport) -> Vec<Address> {
        let mut workers = self.processes.lock().await;
        let members = self.membership_snapshot(workers.values()).await;

        let mut reclaimed_ids = Vec::new();
        for (id, worker) in workers.iter_mut() {
            let (fired, kill) = self.check_worker(worker, members.as_ref()).await;
            if kill {
                if let Err(e) = worker.kill().await {
                    warn!(worker_id = %id, error = %e, "failed to kill worker process");
                }
            }
            if !fired.is_empty() {
                reclaimed_ids.push(id.clone());
                report.failures.extend(fired);
            }
        }

        let mut reclaimed = Vec::with_capacity(reclaimed_ids.len());
        for id in reclaimed_ids {
            if let Some(worker) = workers.remove(&id) {
                info!(worker_id = %id, address = %worker.address, "worker reclaimed");
                reclaimed.push(worker.address);
            }
        }
        report.reclaimed.extend(reclaimed.iter().copied());
        reclaimed
    }

    /// Run the OOM, exit and membership checks on one worker.
    ///
    /// Returns the failures that fired and whether the process must be
    /// killed.
    async fn check_worker(
        &self,
        worker: &mut ManagedWorker,
        members: Option<&HashSet<String>>,
    ) -> (Vec<Failure>, bool) {
        let mut fired = Vec::new();
        let mut kill = false;

        match self.scratch.has_oome_marker(&worker.id).await {
            Ok(true) => {
                kill = true;
                fired.push(self.worker_failure(
                    FailureType::WorkerOom,
                    worker,
                    "Worker ran out of memory".to_string(),
                ));
                if let Err(e) = self.scratch.clear_oome_marker(&worker.id).await {
                    warn!(worker_id = %worker.id, error = %e, "failed to remove oome marker");
                }
            }
            Ok(false) => {}
            Err(e) => warn!(worker_id = %worker.id, error = %e, "failed to check oome marker"),
        }

        match worker.try_exit() {
            Ok(Some(exit)) if !exit.is_success() => {
                fired.push(self.worker_failure(
                    FailureType::WorkerExit,
                    worker,
                    format!("Worker terminated with {exit}"),
                ));
            }
            Ok(Some(_)) => {
                debug!(worker_id = %worker.id, "worker exited cleanly");
            }
            Ok(None) => {}
            Err(e) => warn!(worker_id = %worker.id, error = %e, "failed to query worker exit status"),
        }

        if let (Some(members), Some(endpoint)) = (members, worker.member_endpoint.as_deref()) {
            if !members.contains(endpoint) {
                kill = true;
                fired.push(self.worker_failure(
                    FailureType::WorkerMembershipFailure,
                    worker,
                    format!("Worker {endpoint} is no longer a cluster member"),
                ));
            }
        }

        (fired, kill)
    }

    /// One membership snapshot per pass, taken only when some worker has an
    /// endpoint to check.
    async fn membership_snapshot<'a>(
        &self,
        mut workers: impl Iterator<Item = &'a ManagedWorker>,
    ) -> Option<HashSet<String>> {
        let membership = self.membership.as_ref()?;
        if !workers.any(|w| w.member_endpoint.is_some()) {
            return None;
        }

        let membership = Arc::clone(membership);
        match tokio::task::spawn_blocking(move || membership.members()).await {
            Ok(Ok(members)) => Some(members),
            Ok(Err(e)) => {
                warn!(error = %e, "membership snapshot failed, skipping membership checks");
                None
            }
            Err(e) => {
                warn!(error = %e, "membership snapshot task failed, skipping membership checks");
                None
            }
        }
    }

    async fn scan_exceptions(&self, report: &mut PassReport) -> FleetResult<()> {
        for path in self.scratch.exception_files().await? {
            let exception = match self.scratch.take_exception(&path).await {
                Ok(exception) => exception,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read exception file");
                    continue;
                }
            };
            report.exception_files += 1;

            let worker_id = exception.worker_id.unwrap_or_default();
            let mut removed = if worker_id.is_empty() {
                warn!(path = %path.display(), "exception file names no worker");
                None
            } else {
                self.processes.remove(&worker_id).await
            };
            let address = removed
                .as_ref()
                .map_or(self.settings.agent_address, |w| w.address);

            let payload = exception.payload;
            report.failures.push(
                self.failure(FailureType::WorkerException, address, &worker_id, payload.message)
                    .with_test_id(payload.test_id)
                    .with_cause(payload.cause),
            );

            if let Some(worker) = removed.as_mut() {
                if let Err(e) = worker.kill().await {
                    warn!(worker_id = %worker.id, error = %e, "failed to kill worker process");
                }
                self.registry.remove_worker(&worker.address).await;
                info!(worker_id = %worker.id, address = %worker.address, "worker reclaimed");
                report.reclaimed.push(worker.address);
            }
        }
        Ok(())
    }

    fn worker_failure(
        &self,
        failure_type: FailureType,
        worker: &ManagedWorker,
        message: String,
    ) -> Failure {
        self.failure(failure_type, worker.address, &worker.id, message)
    }

    fn failure(
        &self,
        failure_type: FailureType,
        source: Address,
        worker_id: &str,
        message: String,
    ) -> Failure {
        Failure::new(failure_type, source, message)
            .with_endpoint(self.settings.agent_endpoint.as_str())
            .with_worker_id(worker_id)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
