use std::collections::BTreeMap;
use std::io;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::domain::models::Address;
use crate::domain::ports::{ProcessExit, WorkerProcess};

/// A worker process owned by this agent.
pub struct ManagedWorker {
    pub id: String,
    pub address: Address,
    /// Cluster endpoint the worker joined with, once known.
    pub member_endpoint: Option<String>,
    process: Box<dyn WorkerProcess>,
}

impl ManagedWorker {
    pub fn new(id: impl Into<String>, address: Address, process: Box<dyn WorkerProcess>) -> Self {
        Self {
            id: id.into(),
            address,
            member_endpoint: None,
            process,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    pub fn try_exit(&mut self) -> io::Result<Option<ProcessExit>> {
        self.process.try_exit()
    }

    pub async fn kill(&mut self) -> io::Result<()> {
        self.process.kill().await
    }
}

impl std::fmt::Debug for ManagedWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedWorker")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("member_endpoint", &self.member_endpoint)
            .field("pid", &self.pid())
            .finish()
    }
}

/// Process table of one agent, keyed by worker id.
#[derive(Debug, Default)]
pub struct WorkerProcessManager {
    workers: Mutex<BTreeMap<String, ManagedWorker>>,
}

impl WorkerProcessManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a worker. A worker already registered under the same id is
    /// replaced and returned.
    pub async fn register(&self, worker: ManagedWorker) -> Option<ManagedWorker> {
        info!(
            worker_id = %worker.id,
            address = %worker.address,
            pid = ?worker.pid(),
            "worker process registered"
        );
        self.workers.lock().await.insert(worker.id.clone(), worker)
    }

    pub async fn set_member_endpoint(&self, worker_id: &str, endpoint: impl Into<String>) -> bool {
        match self.workers.lock().await.get_mut(worker_id) {
            Some(worker) => {
                worker.member_endpoint = Some(endpoint.into());
                true
            }
            None => false,
        }
    }

    pub async fn remove(&self, worker_id: &str) -> Option<ManagedWorker> {
        self.workers.lock().await.remove(worker_id)
    }

    pub async fn contains(&self, worker_id: &str) -> bool {
        self.workers.lock().await.contains_key(worker_id)
    }

    pub async fn address_of(&self, worker_id: &str) -> Option<Address> {
        self.workers.lock().await.get(worker_id).map(|w| w.address)
    }

    pub async fn len(&self) -> usize {
        self.workers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.workers.lock().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.workers.lock().await.keys().cloned().collect()
    }

    /// True once no registered worker is still running. Status query errors
    /// count as running.
    pub async fn all_exited(&self) -> bool {
        self.workers
            .lock()
            .await
            .values_mut()
            .all(|w| matches!(w.try_exit(), Ok(Some(_))))
    }

    /// Kill and drop every worker, e.g. when the agent shuts down.
    pub async fn kill_all(&self) -> usize {
        let mut workers = self.workers.lock().await;
        let count = workers.len();
        for (id, mut worker) in std::mem::take(&mut *workers) {
            if let Err(e) = worker.kill().await {
                warn!(worker_id = %id, error = %e, "failed to kill worker process");
            }
        }
        count
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, BTreeMap<String, ManagedWorker>> {
        self.workers.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct NoopProcess {
        killed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl WorkerProcess for NoopProcess {
        fn pid(&self) -> Option<u32> {
            Some(42)
        }

        fn try_exit(&mut self) -> io::Result<Option<ProcessExit>> {
            Ok(None)
        }

        async fn kill(&mut self) -> io::Result<()> {
            self.killed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_register_and_remove() {
        let manager = WorkerProcessManager::new();
        manager
            .register(ManagedWorker::new(
                "w1",
                Address::worker(1, 1),
                Box::new(NoopProcess::default()),
            ))
            .await;

        assert!(manager.contains("w1").await);
        assert_eq!(manager.address_of("w1").await, Some(Address::worker(1, 1)));
        assert!(manager.set_member_endpoint("w1", "10.0.0.1:5701").await);
        assert!(!manager.set_member_endpoint("w9", "10.0.0.1:5701").await);
        assert!(!manager.all_exited().await);

        let removed = manager.remove("w1").await.unwrap();
        assert_eq!(removed.member_endpoint.as_deref(), Some("10.0.0.1:5701"));
        assert!(manager.is_empty().await);
        assert!(manager.all_exited().await);
    }

    #[tokio::test]
    async fn test_kill_all() {
        let manager = WorkerProcessManager::new();
        let killed = Arc::new(AtomicBool::new(false));
        manager
            .register(ManagedWorker::new(
                "w1",
                Address::worker(1, 1),
                Box::new(NoopProcess {
                    killed: Arc::clone(&killed),
                }),
            ))
            .await;

        assert_eq!(manager.kill_all().await, 1);
        assert!(killed.load(Ordering::SeqCst));
        assert_eq!(manager.len().await, 0);
    }
}
