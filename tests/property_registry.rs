//! Property-based tests for worker selection and addressing.

use std::collections::HashMap;

use loadfleet::domain::models::{Address, TargetType, WorkerKind, WorkerSettings};
use loadfleet::services::ComponentRegistry;
use loadfleet::FleetError;
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("Failed to build runtime")
}

/// Registry with one agent per entry of `workers_per_agent`.
async fn registry_with(workers_per_agent: &[usize]) -> ComponentRegistry {
    let registry = ComponentRegistry::new();
    for (i, &count) in workers_per_agent.iter().enumerate() {
        let ip = format!("10.0.0.{}", i + 1);
        let agent = registry.add_agent(ip.as_str(), ip.as_str()).await;
        registry
            .add_workers(
                agent.address(),
                (0..count)
                    .map(|_| WorkerSettings::new(WorkerKind::Member, "4.2"))
                    .collect(),
            )
            .await
            .unwrap();
    }
    registry
}

proptest! {
    #[test]
    fn prop_get_workers_returns_exactly_count(
        layout in prop::collection::vec(1usize..6, 1..5),
        pick in 0usize..30,
    ) {
        let total: usize = layout.iter().sum();
        let count = pick % (total + 1);

        let result = runtime().block_on(async {
            let registry = registry_with(&layout).await;
            registry.get_workers(count, TargetType::All).await
        });

        // Selection may still come up short when agents are unevenly loaded.
        match result {
            Ok(workers) => {
                prop_assert_eq!(workers.len(), count);
                let per_agent_cap = count.div_ceil(layout.len());
                let mut per_agent: HashMap<u32, usize> = HashMap::new();
                for worker in &workers {
                    *per_agent.entry(worker.address.agent_index()).or_default() += 1;
                }
                prop_assert!(per_agent.values().all(|&n| n <= per_agent_cap));
            }
            Err(FleetError::NotEnoughWorkers { wanted, found, .. }) => {
                prop_assert_eq!(wanted, count);
                prop_assert!(found < count);
            }
            Err(e) => prop_assert!(false, "unexpected error: {}", e),
        }
    }

    #[test]
    fn prop_get_workers_rejects_over_request(
        layout in prop::collection::vec(0usize..4, 1..4),
        extra in 1usize..5,
    ) {
        let total: usize = layout.iter().sum();
        let result = runtime().block_on(async {
            let registry = registry_with(&layout).await;
            registry.get_workers(total + extra, TargetType::All).await
        });
        prop_assert!(matches!(result, Err(FleetError::InvalidArgument(_))));
    }

    #[test]
    fn prop_removing_everything_empties_registry(
        layout in prop::collection::vec(0usize..5, 1..5),
    ) {
        let (workers, agents) = runtime().block_on(async {
            let registry = registry_with(&layout).await;
            for worker in registry.workers().await {
                prop_assert!(registry.remove_worker(&worker.address).await);
            }
            for agent in registry.agents().await {
                registry.remove_agent(agent.agent_index).await;
            }
            Ok::<_, TestCaseError>((registry.worker_count().await, registry.agent_count().await))
        })?;
        prop_assert_eq!(workers, 0);
        prop_assert_eq!(agents, 0);
    }

    #[test]
    fn prop_address_text_round_trip(
        agent in 1u32..1000,
        worker in 0u32..1000,
        test in 0u32..1000,
    ) {
        let address = Address::test(agent, worker, test);
        let parsed: Address = address.to_string().parse().unwrap();
        prop_assert_eq!(parsed, address);
    }
}
