//! Failure collection, persistence and the end-of-run verdict.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::temp_dir;
use loadfleet::domain::models::{Address, Failure, FailureType};
use loadfleet::infrastructure::persistence::FailureStore;
use loadfleet::services::{FailureCollector, FailureSummary};
use loadfleet::FleetError;

fn failure(failure_type: FailureType, agent: u32, worker: u32) -> Failure {
    Failure::new(failure_type, Address::worker(agent, worker), "boom")
        .with_endpoint("10.0.0.1:9000")
        .with_worker_id(format!("w{worker}"))
}

#[tokio::test]
async fn test_timeout_is_tolerated_when_non_critical() {
    let dir = temp_dir();
    let collector = FailureCollector::new(
        dir.path(),
        HashSet::from([FailureType::WorkerTimeout]),
    );

    collector.notify(failure(FailureType::WorkerTimeout, 1, 1)).await.unwrap();
    collector.notify(failure(FailureType::WorkerTimeout, 1, 2)).await.unwrap();

    assert_eq!(collector.failure_count().await, 2);
    assert!(!collector.has_critical_failure().await);
    assert!(collector.log_failure_info().await.is_ok());
}

#[tokio::test]
async fn test_critical_failure_fails_the_run() {
    let dir = temp_dir();
    let collector = FailureCollector::new(dir.path(), HashSet::new());

    collector.notify(failure(FailureType::WorkerException, 1, 1)).await.unwrap();

    match collector.log_failure_info().await {
        Err(FleetError::CriticalFailures { count, summary }) => {
            assert_eq!(count, 1);
            assert!(summary.contains("WORKER_EXCEPTION"));
        }
        other => panic!("expected CriticalFailures, got {other:?}"),
    }
}

#[tokio::test]
async fn test_finished_workers_are_not_failures() {
    let dir = temp_dir();
    let collector = FailureCollector::new(dir.path(), HashSet::new());

    collector.notify(failure(FailureType::WorkerFinished, 1, 1)).await.unwrap();
    collector.notify(failure(FailureType::WorkerFinished, 2, 1)).await.unwrap();

    assert_eq!(collector.failure_count().await, 0);
    assert_eq!(
        collector.finished_workers().await,
        HashSet::from([Address::worker(1, 1), Address::worker(2, 1)])
    );
    assert!(collector.log_failure_info().await.is_ok());
}

#[tokio::test]
async fn test_concurrent_reports_are_all_persisted() {
    let dir = temp_dir();
    let collector = Arc::new(FailureCollector::new(dir.path(), HashSet::new()));

    let handles: Vec<_> = (1..=20u32)
        .map(|i| {
            let collector = Arc::clone(&collector);
            tokio::spawn(async move {
                collector
                    .notify(failure(FailureType::WorkerExit, 1 + i % 3, i))
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(collector.failure_count().await, 20);

    let stored = FailureStore::new(dir.path()).load_all().await.unwrap();
    assert_eq!(stored.len(), 20);
    let workers: HashSet<_> = stored.iter().map(|f| f.worker_id.clone()).collect();
    assert_eq!(workers.len(), 20);
}

#[tokio::test]
async fn test_summary_over_stored_failures() {
    let dir = temp_dir();
    let collector = FailureCollector::new(
        dir.path(),
        HashSet::from([FailureType::WorkerTimeout]),
    );
    collector.notify(failure(FailureType::WorkerTimeout, 1, 1)).await.unwrap();
    collector.notify(failure(FailureType::WorkerOom, 1, 2)).await.unwrap();
    collector.notify(failure(FailureType::WorkerOom, 2, 1)).await.unwrap();

    let stored = FailureStore::new(dir.path()).load_all().await.unwrap();
    let summary = FailureSummary::from_failures(
        stored.iter(),
        &HashSet::from([FailureType::WorkerTimeout]),
    );

    assert_eq!(summary.total, 3);
    assert_eq!(summary.critical, 2);
    assert_eq!(summary.counts.get(&FailureType::WorkerOom), Some(&2));
    assert!(summary.has_critical());
    assert!(summary.verdict().is_err());
    assert_eq!(summary, collector.summary().await);
}

#[tokio::test]
async fn test_runs_sharing_an_output_dir_stay_separate() {
    let base = temp_dir();

    let first = FailureCollector::with_store(
        FailureStore::create_run(base.path()).await.unwrap(),
        HashSet::new(),
    );
    first.notify(failure(FailureType::WorkerException, 1, 1)).await.unwrap();
    assert!(first.log_failure_info().await.is_err());

    let non_critical = HashSet::from([FailureType::WorkerTimeout]);
    let second = FailureCollector::with_store(
        FailureStore::create_run(base.path()).await.unwrap(),
        non_critical.clone(),
    );
    assert_ne!(first.store().dir(), second.store().dir());

    // Same sequence number and source as the first run's record.
    second.notify(failure(FailureType::WorkerTimeout, 1, 1)).await.unwrap();
    assert!(second.log_failure_info().await.is_ok());

    let latest = FailureStore::latest_run(base.path()).await.unwrap().unwrap();
    assert_eq!(latest.dir(), second.store().dir());
    let stored = latest.load_all().await.unwrap();
    assert_eq!(stored.len(), 1);
    let summary = FailureSummary::from_failures(stored.iter(), &non_critical);
    assert!(summary.verdict().is_ok());

    let earlier = first.store().load_all().await.unwrap();
    assert_eq!(earlier.len(), 1);
}
