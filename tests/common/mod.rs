//! Common test utilities for integration tests
//!
//! Shared fixtures for building a small fleet: a registry with one agent, a
//! failure collector writing into a temp dir, and a supervisor over real OS
//! worker processes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use loadfleet::application::{HealthSupervisor, ManagedWorker, SupervisorSettings, WorkerProcessManager};
use loadfleet::domain::models::{Address, FailureType, WorkerKind, WorkerSettings};
use loadfleet::domain::ports::FailureReporter;
use loadfleet::infrastructure::process::OsWorkerProcess;
use loadfleet::infrastructure::scratch::ScratchDir;
use loadfleet::services::{ComponentRegistry, FailureCollector};
use tempfile::TempDir;
use tokio::process::Command;

/// Create a temporary directory for test isolation
pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Setup test logging
///
/// Call this at the beginning of tests that need logging.
#[allow(dead_code)]
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Wait for an async condition with timeout, polling every 20ms.
#[allow(dead_code)]
pub async fn wait_for<F, Fut>(mut predicate: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    let timeout = Duration::from_millis(timeout_ms);

    while start.elapsed() < timeout {
        if predicate().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    false
}

/// One agent with its registry, collector, process table and supervisor.
#[allow(dead_code)]
pub struct AgentFixture {
    pub dir: TempDir,
    pub scratch: ScratchDir,
    pub registry: Arc<ComponentRegistry>,
    pub collector: Arc<FailureCollector>,
    pub processes: Arc<WorkerProcessManager>,
    pub supervisor: Arc<HealthSupervisor>,
    pub agent: Address,
}

#[allow(dead_code)]
impl AgentFixture {
    pub async fn new(non_critical: &[FailureType]) -> Self {
        let dir = temp_dir();
        let scratch = ScratchDir::new(dir.path().join("workers"));
        std::fs::create_dir_all(scratch.path()).expect("Failed to create scratch dir");

        let registry = Arc::new(ComponentRegistry::new());
        let collector = Arc::new(FailureCollector::new(
            dir.path().join("failures"),
            non_critical.iter().copied().collect::<HashSet<_>>(),
        ));
        let processes = Arc::new(WorkerProcessManager::new());
        let agent = registry.add_agent("127.0.0.1", "127.0.0.1").await.address();

        let supervisor = Arc::new(HealthSupervisor::new(
            SupervisorSettings {
                interval: Duration::from_millis(25),
                agent_address: agent,
                agent_endpoint: "127.0.0.1:9000".to_string(),
            },
            scratch.clone(),
            Arc::clone(&processes),
            Arc::clone(&registry),
            Arc::clone(&collector) as Arc<dyn FailureReporter>,
        ));

        Self {
            dir,
            scratch,
            registry,
            collector,
            processes,
            supervisor,
            agent,
        }
    }

    /// Register a worker and spawn `sh -c script` for it. The worker id is
    /// its address text unless `id` is given.
    pub async fn spawn_worker(&self, id: Option<&str>, script: &str) -> Address {
        let record = self
            .registry
            .add_workers(self.agent, vec![WorkerSettings::new(WorkerKind::Member, "4.2")])
            .await
            .expect("Failed to register worker")
            .remove(0);
        let worker_id = id.map_or_else(|| record.address.to_string(), ToString::to_string);
        let process = OsWorkerProcess::spawn(Command::new("sh").arg("-c").arg(script))
            .expect("Failed to spawn worker");
        self.processes
            .register(ManagedWorker::new(worker_id, record.address, Box::new(process)))
            .await;
        record.address
    }

    pub fn failure_files(&self) -> usize {
        std::fs::read_dir(self.dir.path().join("failures"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}
