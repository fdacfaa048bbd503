//! Coordinator-side failure aggregation.
//!
//! Every failure reported by any tier ends up here. The collector records it,
//! writes it to disk, tells subscribers about it and decides whether the run
//! has failed.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{error, info, warn};

use crate::domain::errors::{FleetError, FleetResult};
use crate::domain::models::{Address, Failure, FailureType};
use crate::domain::ports::FailureReporter;
use crate::infrastructure::persistence::FailureStore;

/// Per-type tally of a set of failures under a given critical policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureSummary {
    /// Counts in taxonomy order.
    pub counts: BTreeMap<FailureType, usize>,
    pub total: usize,
    pub critical: usize,
    critical_counts: BTreeMap<FailureType, usize>,
}

impl FailureSummary {
    /// `WorkerFinished` entries are ignored.
    pub fn from_failures<'a>(
        failures: impl IntoIterator<Item = &'a Failure>,
        non_critical_types: &HashSet<FailureType>,
    ) -> Self {
        let mut summary = Self::default();
        for failure in failures {
            let failure_type = failure.failure_type;
            if failure_type.is_worker_finished() {
                continue;
            }
            summary.total += 1;
            *summary.counts.entry(failure_type).or_default() += 1;
            if !non_critical_types.contains(&failure_type) {
                summary.critical += 1;
                *summary.critical_counts.entry(failure_type).or_default() += 1;
            }
        }
        summary
    }

    pub const fn has_critical(&self) -> bool {
        self.critical > 0
    }

    /// Pass/fail verdict for a run.
    pub fn verdict(&self) -> FleetResult<()> {
        if !self.has_critical() {
            return Ok(());
        }
        let summary = self
            .critical_counts
            .iter()
            .map(|(failure_type, count)| format!("{failure_type} x{count}"))
            .collect::<Vec<_>>()
            .join(", ");
        Err(FleetError::CriticalFailures {
            count: self.critical,
            summary,
        })
    }
}

#[derive(Debug, Default)]
struct CollectorState {
    failures: Vec<Failure>,
    sequence: u64,
    finished_workers: HashSet<Address>,
}

/// Aggregates failures for one coordinator run.
///
/// The set of non-critical failure types is fixed at construction. Anything
/// outside it fails the run and raises the abort signal.
pub struct FailureCollector {
    store: FailureStore,
    non_critical_types: HashSet<FailureType>,
    state: Mutex<CollectorState>,
    event_tx: broadcast::Sender<Failure>,
    abort_tx: watch::Sender<bool>,
}

impl FailureCollector {
    /// Collector persisting straight into `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>, non_critical_types: HashSet<FailureType>) -> Self {
        Self::with_store(FailureStore::new(output_dir), non_critical_types)
    }

    /// Collector persisting through `store`, typically a fresh
    /// [`FailureStore::create_run`] directory.
    pub fn with_store(store: FailureStore, non_critical_types: HashSet<FailureType>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let (abort_tx, _) = watch::channel(false);
        Self {
            store,
            non_critical_types,
            state: Mutex::new(CollectorState::default()),
            event_tx,
            abort_tx,
        }
    }

    pub fn is_critical(&self, failure_type: FailureType) -> bool {
        !failure_type.is_worker_finished() && !self.non_critical_types.contains(&failure_type)
    }

    /// Record a failure.
    ///
    /// `WorkerFinished` only marks the worker as done. Everything else is
    /// numbered, persisted, appended, logged and broadcast while holding the
    /// collector lock. A persistence error is returned after the failure has
    /// been recorded in memory.
    pub async fn notify(&self, failure: Failure) -> FleetResult<()> {
        let mut state = self.state.lock().await;

        if failure.failure_type.is_worker_finished() {
            info!(worker = %failure.source, "worker finished");
            state.finished_workers.insert(failure.source);
            return Ok(());
        }

        state.sequence += 1;
        let sequence = state.sequence;
        let persisted = self.store.persist(sequence, &failure).await;
        state.failures.push(failure.clone());

        let critical = self.is_critical(failure.failure_type);
        if critical {
            error!(
                failure_type = %failure.failure_type,
                source = %failure.source,
                worker_id = %failure.worker_id,
                test_id = ?failure.test_id,
                endpoint = %failure.endpoint,
                cause = ?failure.cause,
                "{}",
                failure.message
            );
        } else {
            warn!(
                failure_type = %failure.failure_type,
                source = %failure.source,
                worker_id = %failure.worker_id,
                test_id = ?failure.test_id,
                "non-critical failure: {}",
                failure.message
            );
        }

        if let Err(e) = &persisted {
            error!(sequence, error = %e, "failed to persist failure");
        }

        // No subscribers is fine.
        let _ = self.event_tx.send(failure);
        if critical {
            self.abort_tx.send_replace(true);
        }

        persisted.map(|_| ())
    }

    /// Number of recorded failures, excluding completion signals.
    pub async fn failure_count(&self) -> usize {
        self.state.lock().await.failures.len()
    }

    pub async fn has_critical_failure(&self) -> bool {
        self.state
            .lock()
            .await
            .failures
            .iter()
            .any(|f| self.is_critical(f.failure_type))
    }

    pub async fn failures(&self) -> Vec<Failure> {
        self.state.lock().await.failures.clone()
    }

    pub async fn finished_workers(&self) -> HashSet<Address> {
        self.state.lock().await.finished_workers.clone()
    }

    pub async fn summary(&self) -> FailureSummary {
        let state = self.state.lock().await;
        FailureSummary::from_failures(&state.failures, &self.non_critical_types)
    }

    /// Log the per-type failure counts and return the run verdict.
    pub async fn log_failure_info(&self) -> FleetResult<()> {
        let summary = self.summary().await;

        if summary.total == 0 {
            info!("no failures have been detected");
            return Ok(());
        }

        for (failure_type, count) in &summary.counts {
            let critical = self.is_critical(*failure_type);
            if critical {
                error!(
                    failure_type = %failure_type,
                    count,
                    description = failure_type.description(),
                    "critical failures detected"
                );
            } else {
                warn!(
                    failure_type = %failure_type,
                    count,
                    description = failure_type.description(),
                    "non-critical failures detected"
                );
            }
        }

        let verdict = summary.verdict();
        if verdict.is_ok() {
            warn!(total = summary.total, "run completed with only non-critical failures");
        }
        verdict
    }

    /// Stream of failures as they are recorded.
    pub fn subscribe(&self) -> broadcast::Receiver<Failure> {
        self.event_tx.subscribe()
    }

    /// Flips to `true` on the first critical failure.
    pub fn abort_signal(&self) -> watch::Receiver<bool> {
        self.abort_tx.subscribe()
    }

    pub fn store(&self) -> &FailureStore {
        &self.store
    }
}

#[async_trait]
impl FailureReporter for FailureCollector {
    async fn report(&self, failure: Failure) -> FleetResult<()> {
        self.notify(failure).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn collector(dir: &TempDir, non_critical: &[FailureType]) -> FailureCollector {
        FailureCollector::new(dir.path(), non_critical.iter().copied().collect())
    }

    fn failure(failure_type: FailureType) -> Failure {
        Failure::new(failure_type, Address::worker(1, 1), "something broke")
            .with_worker_id("C_A1_W1")
            .with_endpoint("10.0.0.1:5701")
    }

    fn json_files(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .path()
                    .extension()
                    .is_some_and(|ext| ext == "json")
            })
            .count()
    }

    #[tokio::test]
    async fn test_notify_counts_and_persists() {
        let dir = TempDir::new().unwrap();
        let collector = collector(&dir, &[]);

        collector.notify(failure(FailureType::WorkerOom)).await.unwrap();
        collector.notify(failure(FailureType::WorkerExit)).await.unwrap();

        assert_eq!(collector.failure_count().await, 2);
        assert_eq!(json_files(&dir), 2);
    }

    #[tokio::test]
    async fn test_worker_finished_is_not_a_failure() {
        let dir = TempDir::new().unwrap();
        let collector = collector(&dir, &[]);

        collector.notify(failure(FailureType::WorkerFinished)).await.unwrap();

        assert_eq!(collector.failure_count().await, 0);
        assert!(!collector.has_critical_failure().await);
        assert_eq!(json_files(&dir), 0);
        assert!(collector
            .finished_workers()
            .await
            .contains(&Address::worker(1, 1)));
        assert!(collector.log_failure_info().await.is_ok());
    }

    #[tokio::test]
    async fn test_non_critical_then_critical() {
        let dir = TempDir::new().unwrap();
        let collector = collector(&dir, &[FailureType::WorkerTimeout]);

        collector.notify(failure(FailureType::WorkerTimeout)).await.unwrap();
        assert_eq!(collector.failure_count().await, 1);
        assert!(!collector.has_critical_failure().await);
        assert!(collector.log_failure_info().await.is_ok());

        collector.notify(failure(FailureType::WorkerException)).await.unwrap();
        assert_eq!(collector.failure_count().await, 2);
        assert!(collector.has_critical_failure().await);

        let err = collector.log_failure_info().await.unwrap_err();
        match err {
            FleetError::CriticalFailures { count, summary } => {
                assert_eq!(count, 1);
                assert_eq!(summary, "WORKER_EXCEPTION x1");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_abort_signal_raised_on_first_critical() {
        let dir = TempDir::new().unwrap();
        let collector = collector(&dir, &[FailureType::WorkerTimeout]);
        let abort = collector.abort_signal();

        collector.notify(failure(FailureType::WorkerTimeout)).await.unwrap();
        assert!(!*abort.borrow());

        collector.notify(failure(FailureType::WorkerOom)).await.unwrap();
        assert!(*abort.borrow());
    }

    #[tokio::test]
    async fn test_subscribers_see_failures() {
        let dir = TempDir::new().unwrap();
        let collector = collector(&dir, &[]);
        let mut rx = collector.subscribe();

        collector.notify(failure(FailureType::WorkerFinished)).await.unwrap();
        collector.notify(failure(FailureType::WorkerExit)).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.failure_type, FailureType::WorkerExit);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_persist_error_still_records_failure() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();
        let collector = FailureCollector::new(&blocker, HashSet::new());

        let result = collector.notify(failure(FailureType::WorkerOom)).await;
        assert!(result.is_err());
        assert_eq!(collector.failure_count().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_notify_loses_nothing() {
        let dir = TempDir::new().unwrap();
        let collector = Arc::new(collector(&dir, &[]));

        let handles: Vec<_> = (0..50)
            .map(|i| {
                let collector = Arc::clone(&collector);
                tokio::spawn(async move {
                    let f = Failure::new(
                        FailureType::WorkerException,
                        Address::worker(1, i + 1),
                        format!("failure {i}"),
                    );
                    collector.notify(f).await.unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(collector.failure_count().await, 50);
        assert_eq!(json_files(&dir), 50);
    }

    #[test]
    fn test_summary_counts_in_taxonomy_order() {
        let failures = vec![
            failure(FailureType::WorkerExit),
            failure(FailureType::WorkerException),
            failure(FailureType::WorkerExit),
            failure(FailureType::WorkerFinished),
        ];
        let non_critical: HashSet<_> = [FailureType::WorkerExit].into_iter().collect();
        let summary = FailureSummary::from_failures(&failures, &non_critical);

        assert_eq!(summary.total, 3);
        assert_eq!(summary.critical, 1);
        assert_eq!(
            summary.counts.into_iter().collect::<Vec<_>>(),
            vec![(FailureType::WorkerException, 1), (FailureType::WorkerExit, 2)]
        );
    }

    #[tokio::test]
    async fn test_reporter_port_delegates_to_notify() {
        let dir = TempDir::new().unwrap();
        let collector = collector(&dir, &[]);
        let reporter: &dyn FailureReporter = &collector;

        reporter.report(failure(FailureType::WorkerOom)).await.unwrap();
        assert_eq!(collector.failure_count().await, 1);
    }
}
