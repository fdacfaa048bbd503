//! Authoritative in-memory view of the fleet.
//!
//! Agents, their workers and the tests of the current run live behind a
//! single lock, so a batch of workers becomes visible all at once and a
//! removal never leaves the per-agent and flat worker lists disagreeing.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::domain::errors::{FleetError, FleetResult};
use crate::domain::models::{
    Address, AddressLevel, AgentRecord, TargetType, TestRecord, TestSuite, WorkerRecord,
    WorkerSettings,
};

#[derive(Debug, Default)]
struct Topology {
    agents: Vec<AgentRecord>,
    /// Every worker of every agent, in registration order.
    workers: Vec<WorkerRecord>,
    tests: Vec<TestRecord>,
    /// Last agent index handed out.
    agent_index: u32,
    /// Last test index handed out.
    test_index: u32,
}

impl Topology {
    fn agent_mut(&mut self, agent_index: u32) -> Option<&mut AgentRecord> {
        self.agents.iter_mut().find(|a| a.agent_index == agent_index)
    }

    fn has_client_workers(&self) -> bool {
        self.workers.iter().any(|w| !w.is_member())
    }

    fn remove_worker(&mut self, address: &Address) -> bool {
        let before = self.workers.len();
        self.workers.retain(|w| w.address != *address);
        let removed_flat = self.workers.len() != before;
        let removed_agent = self
            .agent_mut(address.agent_index())
            .is_some_and(|agent| agent.remove_worker(address));
        removed_flat || removed_agent
    }
}

/// Registry of agents, workers and tests for one coordinator run.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    topology: RwLock<Topology>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent and assign it the next agent index.
    pub async fn add_agent(
        &self,
        public_address: impl Into<String>,
        private_address: impl Into<String>,
    ) -> AgentRecord {
        self.add_agent_with_tags(public_address, private_address, BTreeMap::new())
            .await
    }

    pub async fn add_agent_with_tags(
        &self,
        public_address: impl Into<String>,
        private_address: impl Into<String>,
        tags: BTreeMap<String, String>,
    ) -> AgentRecord {
        let mut topology = self.topology.write().await;
        topology.agent_index += 1;
        let agent = AgentRecord::new(topology.agent_index, public_address, private_address)
            .with_tags(tags);
        topology.agents.push(agent.clone());

        info!(
            agent = %agent.address(),
            addresses = %agent.format_ip_addresses(),
            "agent registered"
        );
        agent
    }

    /// Remove an agent together with all of its workers. Unknown agents are
    /// ignored.
    pub async fn remove_agent(&self, agent_index: u32) {
        let mut topology = self.topology.write().await;
        let Some(position) = topology
            .agents
            .iter()
            .position(|a| a.agent_index == agent_index)
        else {
            return;
        };

        let agent = topology.agents.remove(position);
        topology
            .workers
            .retain(|w| w.address.agent_index() != agent_index);

        info!(
            agent = %agent.address(),
            workers = agent.workers().len(),
            "agent removed"
        );
    }

    /// Register a batch of workers on the agent named by `parent_address`.
    ///
    /// Each worker gets the next index of its agent. The whole batch is
    /// applied under one write lock.
    pub async fn add_workers(
        &self,
        parent_address: Address,
        settings: Vec<WorkerSettings>,
    ) -> FleetResult<Vec<WorkerRecord>> {
        let agent_index = Self::expect_agent_level(parent_address)?;

        let mut topology = self.topology.write().await;
        let agent = topology
            .agent_mut(agent_index)
            .ok_or(FleetError::UnknownAgent(parent_address))?;

        let records: Vec<WorkerRecord> = settings
            .into_iter()
            .map(|settings| {
                let worker_index = agent.allocate_worker_index();
                let record = WorkerRecord::new(Address::worker(agent_index, worker_index), settings);
                agent.push_worker(record.clone());
                record
            })
            .collect();
        topology.workers.extend(records.iter().cloned());

        for record in &records {
            info!(
                worker = %record.address,
                kind = %record.settings.kind,
                version = %record.settings.version_spec,
                "worker registered"
            );
        }
        Ok(records)
    }

    /// Register workers whose indices were assigned elsewhere, e.g. when
    /// rebuilding the registry from a running fleet. The agent's counter is
    /// fast-forwarded past every given index.
    pub async fn add_workers_with_indices(
        &self,
        parent_address: Address,
        workers: Vec<(u32, WorkerSettings)>,
    ) -> FleetResult<Vec<WorkerRecord>> {
        let agent_index = Self::expect_agent_level(parent_address)?;
        if workers.iter().any(|(index, _)| *index == 0) {
            return Err(FleetError::InvalidArgument(
                "worker index must be positive".to_string(),
            ));
        }

        let mut topology = self.topology.write().await;
        let agent = topology
            .agent_mut(agent_index)
            .ok_or(FleetError::UnknownAgent(parent_address))?;

        if let Some(taken) = workers
            .iter()
            .find(|(index, _)| {
                agent
                    .workers()
                    .iter()
                    .any(|w| w.address.worker_index() == *index)
            })
            .map(|(index, _)| *index)
        {
            return Err(FleetError::InvalidArgument(format!(
                "worker index {taken} already registered on {parent_address}"
            )));
        }

        let records: Vec<WorkerRecord> = workers
            .into_iter()
            .map(|(worker_index, settings)| {
                agent.update_worker_index(worker_index);
                let record = WorkerRecord::new(Address::worker(agent_index, worker_index), settings);
                agent.push_worker(record.clone());
                record
            })
            .collect();
        topology.workers.extend(records.iter().cloned());

        debug!(agent = %parent_address, count = records.len(), "workers restored");
        Ok(records)
    }

    /// Remove a worker from its agent and from the flat index.
    ///
    /// Returns whether anything was removed.
    pub async fn remove_worker(&self, address: &Address) -> bool {
        let removed = self.topology.write().await.remove_worker(address);
        if removed {
            info!(worker = %address, "worker removed");
        }
        removed
    }

    pub async fn remove_worker_record(&self, worker: &WorkerRecord) -> bool {
        self.remove_worker(&worker.address).await
    }

    pub async fn agent_count(&self) -> usize {
        self.topology.read().await.agents.len()
    }

    pub async fn worker_count(&self) -> usize {
        self.topology.read().await.workers.len()
    }

    pub async fn has_client_workers(&self) -> bool {
        self.topology.read().await.has_client_workers()
    }

    /// Snapshot of all agents in registration order.
    pub async fn agents(&self) -> Vec<AgentRecord> {
        self.topology.read().await.agents.clone()
    }

    /// The last `count` registered agents (all of them when fewer exist).
    pub async fn get_agents_tail(&self, count: usize) -> Vec<AgentRecord> {
        let topology = self.topology.read().await;
        let skip = topology.agents.len().saturating_sub(count);
        topology.agents[skip..].to_vec()
    }

    pub async fn get_agent(&self, agent_index: u32) -> Option<AgentRecord> {
        self.topology
            .read()
            .await
            .agents
            .iter()
            .find(|a| a.agent_index == agent_index)
            .cloned()
    }

    pub async fn first_agent(&self) -> FleetResult<AgentRecord> {
        self.topology
            .read()
            .await
            .agents
            .first()
            .cloned()
            .ok_or(FleetError::NoAgentsRunning)
    }

    /// Snapshot of all workers in registration order.
    pub async fn workers(&self) -> Vec<WorkerRecord> {
        self.topology.read().await.workers.clone()
    }

    pub async fn get_worker(&self, address: &Address) -> Option<WorkerRecord> {
        self.topology
            .read()
            .await
            .workers
            .iter()
            .find(|w| w.address == *address)
            .cloned()
    }

    pub async fn first_worker(&self) -> FleetResult<WorkerRecord> {
        self.topology
            .read()
            .await
            .workers
            .first()
            .cloned()
            .ok_or(FleetError::NoWorkersRunning)
    }

    /// Select `count` workers matching `target_type`, spread evenly across
    /// agents.
    ///
    /// Agents are visited in registration order and each contributes at most
    /// `ceil(count / agent_count)` workers.
    pub async fn get_workers(
        &self,
        count: usize,
        target_type: TargetType,
    ) -> FleetResult<Vec<WorkerRecord>> {
        let topology = self.topology.read().await;

        if count > topology.workers.len() {
            return Err(FleetError::InvalidArgument(format!(
                "Cannot return more Workers than registered (wanted {count}, registered {})",
                topology.workers.len()
            )));
        }
        if count == 0 {
            return Ok(Vec::new());
        }

        let target_type = target_type.resolve_prefer_clients(topology.has_client_workers());
        let per_agent = count.div_ceil(topology.agents.len());

        let mut selected = Vec::with_capacity(count);
        for agent in &topology.agents {
            let mut taken = 0;
            for worker in agent.workers() {
                if selected.len() == count || taken == per_agent {
                    break;
                }
                if target_type.matches(worker.is_member()) {
                    selected.push(worker.clone());
                    taken += 1;
                }
            }
        }

        if selected.len() < count {
            return Err(FleetError::NotEnoughWorkers {
                target: target_type,
                wanted: count,
                found: selected.len(),
            });
        }
        Ok(selected)
    }

    pub async fn get_worker_addresses(
        &self,
        count: usize,
        target_type: TargetType,
    ) -> FleetResult<Vec<Address>> {
        Ok(self
            .get_workers(count, target_type)
            .await?
            .into_iter()
            .map(|w| w.address)
            .collect())
    }

    /// Workers that have not reported completion.
    pub async fn get_missing_workers(&self, finished: &HashSet<Address>) -> HashSet<Address> {
        self.topology
            .read()
            .await
            .workers
            .iter()
            .map(|w| w.address)
            .filter(|address| !finished.contains(address))
            .collect()
    }

    /// Distinct version specs across all workers.
    pub async fn version_specs(&self) -> BTreeSet<String> {
        self.topology
            .read()
            .await
            .agents
            .iter()
            .flat_map(AgentRecord::version_specs)
            .collect()
    }

    /// Register every test of `suite`, each with the next test index.
    ///
    /// Tests are keyed by id: registering an id again replaces the earlier
    /// record, which then moves to the end of [`tests`](Self::tests).
    pub async fn add_tests(&self, suite: &TestSuite) -> Vec<TestRecord> {
        let mut topology = self.topology.write().await;
        let mut records = Vec::with_capacity(suite.test_cases.len());
        for test_case in &suite.test_cases {
            topology.test_index += 1;
            let record = TestRecord::new(topology.test_index, test_case.clone());
            topology.tests.retain(|t| t.id() != record.id());
            topology.tests.push(record.clone());
            records.push(record);
        }
        debug!(count = records.len(), "tests registered");
        records
    }

    /// Clear all tests between runs. Test indices keep counting up.
    pub async fn remove_tests(&self) {
        self.topology.write().await.tests.clear();
    }

    pub async fn test_count(&self) -> usize {
        self.topology.read().await.tests.len()
    }

    pub async fn tests(&self) -> Vec<TestRecord> {
        self.topology.read().await.tests.clone()
    }

    pub async fn get_test(&self, test_id: &str) -> Option<TestRecord> {
        self.topology
            .read()
            .await
            .tests
            .iter()
            .find(|t| t.id() == test_id)
            .cloned()
    }

    fn expect_agent_level(address: Address) -> FleetResult<u32> {
        if address.level() != AddressLevel::Agent || address.agent_index() == 0 {
            return Err(FleetError::InvalidArgument(format!(
                "expected an agent address, got {address}"
            )));
        }
        Ok(address.agent_index())
    }
}
