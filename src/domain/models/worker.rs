use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::address::Address;

/// Whether a worker process joins the cluster under test or connects to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerKind {
    Member,
    Client,
}

impl WorkerKind {
    pub const fn is_member(self) -> bool {
        matches!(self, Self::Member)
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Member => write!(f, "member"),
            Self::Client => write!(f, "client"),
        }
    }
}

impl FromStr for WorkerKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "member" => Ok(Self::Member),
            "client" | "lite" | "litemember" => Ok(Self::Client),
            _ => Err(anyhow::anyhow!("Invalid worker kind: {s}")),
        }
    }
}

/// Selector used when picking workers for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    All,
    Member,
    Client,
    /// Clients when any are registered, otherwise members.
    PreferClient,
}

impl TargetType {
    /// Collapse `PreferClient` into a concrete selector.
    pub const fn resolve_prefer_clients(self, has_client_workers: bool) -> Self {
        match self {
            Self::PreferClient if has_client_workers => Self::Client,
            Self::PreferClient => Self::Member,
            other => other,
        }
    }

    /// Whether a worker of the given kind is selected.
    ///
    /// `PreferClient` must be resolved first; unresolved it matches nothing.
    pub const fn matches(self, is_member: bool) -> bool {
        match self {
            Self::All => true,
            Self::Member => is_member,
            Self::Client => !is_member,
            Self::PreferClient => false,
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Member => write!(f, "member"),
            Self::Client => write!(f, "client"),
            Self::PreferClient => write!(f, "prefer_client"),
        }
    }
}

impl FromStr for TargetType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" => Ok(Self::All),
            "member" => Ok(Self::Member),
            "client" => Ok(Self::Client),
            "prefer_client" | "preferclient" => Ok(Self::PreferClient),
            _ => Err(anyhow::anyhow!("Invalid target type: {s}")),
        }
    }
}

/// Process-level settings a worker was launched with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSettings {
    pub kind: WorkerKind,

    /// Version of the system under test this worker runs against.
    pub version_spec: String,

    /// Opaque launch parameters forwarded to the worker process.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl WorkerSettings {
    pub fn new(kind: WorkerKind, version_spec: impl Into<String>) -> Self {
        Self {
            kind,
            version_spec: version_spec.into(),
            parameters: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// A worker process known to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub address: Address,
    pub parent_address: Address,
    pub settings: WorkerSettings,
}

impl WorkerRecord {
    pub fn new(address: Address, settings: WorkerSettings) -> Self {
        let parent_address = address.parent().unwrap_or(Address::ROOT);
        Self {
            address,
            parent_address,
            settings,
        }
    }

    pub const fn is_member(&self) -> bool {
        self.settings.kind.is_member()
    }
}
