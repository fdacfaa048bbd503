use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use super::address::Address;
use super::worker::{WorkerKind, WorkerRecord};

/// Which worker kinds an agent is allowed to host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerMode {
    MembersOnly,
    ClientsOnly,
    #[default]
    Mixed,
}

impl fmt::Display for WorkerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MembersOnly => write!(f, "members_only"),
            Self::ClientsOnly => write!(f, "clients_only"),
            Self::Mixed => write!(f, "mixed"),
        }
    }
}

impl FromStr for WorkerMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "members_only" => Ok(Self::MembersOnly),
            "clients_only" => Ok(Self::ClientsOnly),
            "mixed" => Ok(Self::Mixed),
            _ => Err(anyhow::anyhow!("Invalid worker mode: {s}")),
        }
    }
}

/// An agent host and the workers it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// 1-based, never reused within a registry.
    pub agent_index: u32,

    pub public_address: String,

    /// Equal to `public_address` when no address translation is needed.
    pub private_address: String,

    #[serde(default)]
    pub worker_mode: WorkerMode,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    workers: Vec<WorkerRecord>,

    /// Last worker index handed out on this agent.
    current_worker_index: u32,
}

impl AgentRecord {
    pub fn new(
        agent_index: u32,
        public_address: impl Into<String>,
        private_address: impl Into<String>,
    ) -> Self {
        Self {
            agent_index,
            public_address: public_address.into(),
            private_address: private_address.into(),
            worker_mode: WorkerMode::default(),
            tags: BTreeMap::new(),
            workers: Vec::new(),
            current_worker_index: 0,
        }
    }

    #[must_use]
    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    pub const fn address(&self) -> Address {
        Address::agent(self.agent_index)
    }

    pub fn workers(&self) -> &[WorkerRecord] {
        &self.workers
    }

    /// The index the next worker on this agent will receive. Does not allocate.
    pub const fn peek_next_worker_index(&self) -> u32 {
        self.current_worker_index + 1
    }

    /// Allocate the next worker index.
    pub(crate) fn allocate_worker_index(&mut self) -> u32 {
        self.current_worker_index += 1;
        self.current_worker_index
    }

    /// Make sure future allocations stay above `index`.
    pub fn update_worker_index(&mut self, index: u32) {
        self.current_worker_index = self.current_worker_index.max(index);
    }

    pub(crate) fn push_worker(&mut self, worker: WorkerRecord) {
        self.workers.push(worker);
    }

    pub(crate) fn remove_worker(&mut self, address: &Address) -> bool {
        let before = self.workers.len();
        self.workers.retain(|w| w.address != *address);
        self.workers.len() != before
    }

    pub fn count(&self, kind: WorkerKind) -> usize {
        self.workers.iter().filter(|w| w.settings.kind == kind).count()
    }

    pub fn version_specs(&self) -> BTreeSet<String> {
        self.workers
            .iter()
            .map(|w| w.settings.version_spec.clone())
            .collect()
    }

    /// `public` when both addresses agree, otherwise `public private`.
    pub fn format_ip_addresses(&self) -> String {
        if self.public_address == self.private_address {
            self.public_address.clone()
        } else {
            format!("{} {}", self.public_address, self.private_address)
        }
    }
}

impl fmt::Display for AgentRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.address(), self.format_ip_addresses())
    }
}
