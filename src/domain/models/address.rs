//! Hierarchical fleet addresses.
//!
//! Every entity in a run (the coordinator, an agent, a worker process, a test
//! instance) is named by an [`Address`]. Addresses are value types: cheap to
//! copy, totally ordered, and rendered as `C_A1_W2_T3`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Depth of an address in the fleet tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressLevel {
    /// The coordinator.
    Root,
    Agent,
    Worker,
    Test,
}

impl AddressLevel {
    const fn parent(self) -> Option<Self> {
        match self {
            Self::Root => None,
            Self::Agent => Some(Self::Root),
            Self::Worker => Some(Self::Agent),
            Self::Test => Some(Self::Worker),
        }
    }
}

impl fmt::Display for AddressLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => write!(f, "root"),
            Self::Agent => write!(f, "agent"),
            Self::Worker => write!(f, "worker"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Errors produced while building or parsing an [`Address`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid address '{0}': must start with 'C'")]
    MissingRoot(String),

    #[error("Invalid address component '{component}' in '{input}'")]
    InvalidComponent { input: String, component: String },

    #[error("Invalid address '{0}': components must appear in agent, worker, test order")]
    OutOfOrder(String),

    #[error("Index below level {level} must be zero")]
    IndexBelowLevel { level: AddressLevel },
}

/// Immutable identifier of a fleet entity.
///
/// Indices below the address's level are always zero. Indices at or above the
/// level are positive, or zero to mean "any" (rendered as `*`).
///
/// The derived ordering compares level first, then agent, worker and test
/// index, so it is total and sorts by specificity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address {
    level: AddressLevel,
    agent_index: u32,
    worker_index: u32,
    test_index: u32,
}

impl Address {
    /// The coordinator address, `C`.
    pub const ROOT: Self = Self {
        level: AddressLevel::Root,
        agent_index: 0,
        worker_index: 0,
        test_index: 0,
    };

    /// Build an address, rejecting non-zero indices below `level`.
    pub fn new(
        level: AddressLevel,
        agent_index: u32,
        worker_index: u32,
        test_index: u32,
    ) -> Result<Self, AddressError> {
        let below_level_set = match level {
            AddressLevel::Root => agent_index != 0 || worker_index != 0 || test_index != 0,
            AddressLevel::Agent => worker_index != 0 || test_index != 0,
            AddressLevel::Worker => test_index != 0,
            AddressLevel::Test => false,
        };
        if below_level_set {
            return Err(AddressError::IndexBelowLevel { level });
        }
        Ok(Self {
            level,
            agent_index,
            worker_index,
            test_index,
        })
    }

    pub const fn agent(agent_index: u32) -> Self {
        Self {
            level: AddressLevel::Agent,
            agent_index,
            worker_index: 0,
            test_index: 0,
        }
    }

    pub const fn worker(agent_index: u32, worker_index: u32) -> Self {
        Self {
            level: AddressLevel::Worker,
            agent_index,
            worker_index,
            test_index: 0,
        }
    }

    pub const fn test(agent_index: u32, worker_index: u32, test_index: u32) -> Self {
        Self {
            level: AddressLevel::Test,
            agent_index,
            worker_index,
            test_index,
        }
    }

    pub const fn level(&self) -> AddressLevel {
        self.level
    }

    pub const fn agent_index(&self) -> u32 {
        self.agent_index
    }

    pub const fn worker_index(&self) -> u32 {
        self.worker_index
    }

    pub const fn test_index(&self) -> u32 {
        self.test_index
    }

    /// The address one level up, with this level's index cleared.
    ///
    /// The root has no parent.
    pub const fn parent(&self) -> Option<Self> {
        let Some(level) = self.level.parent() else {
            return None;
        };
        let mut parent = Self { level, ..*self };
        match self.level {
            AddressLevel::Root => {}
            AddressLevel::Agent => parent.agent_index = 0,
            AddressLevel::Worker => parent.worker_index = 0,
            AddressLevel::Test => parent.test_index = 0,
        }
        Some(parent)
    }

    /// The agent-level ancestor of this address, or the address itself when
    /// it already is agent-level. The root has no agent.
    pub fn agent_address(&self) -> Option<Self> {
        match self.level {
            AddressLevel::Root => None,
            _ => Some(Self::agent(self.agent_index)),
        }
    }

    /// True when `self` lies on the path from the root to `other`.
    ///
    /// An address is considered its own ancestor.
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        if self.level > other.level {
            return false;
        }
        let agent_ok = self.level < AddressLevel::Agent || self.agent_index == other.agent_index;
        let worker_ok =
            self.level < AddressLevel::Worker || self.worker_index == other.worker_index;
        let test_ok = self.level < AddressLevel::Test || self.test_index == other.test_index;
        agent_ok && worker_ok && test_ok
    }
}

fn write_index(f: &mut fmt::Formatter<'_>, prefix: char, index: u32) -> fmt::Result {
    if index == 0 {
        write!(f, "_{prefix}*")
    } else {
        write!(f, "_{prefix}{index}")
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C")?;
        if self.level >= AddressLevel::Agent {
            write_index(f, 'A', self.agent_index)?;
        }
        if self.level >= AddressLevel::Worker {
            write_index(f, 'W', self.worker_index)?;
        }
        if self.level >= AddressLevel::Test {
            write_index(f, 'T', self.test_index)?;
        }
        Ok(())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('_');
        if parts.next() != Some("C") {
            return Err(AddressError::MissingRoot(s.to_string()));
        }

        let expected = [
            ('A', AddressLevel::Agent),
            ('W', AddressLevel::Worker),
            ('T', AddressLevel::Test),
        ];
        let mut indices = [0_u32; 3];
        let mut level = AddressLevel::Root;

        for (slot, part) in parts.enumerate() {
            let Some(&(prefix, part_level)) = expected.get(slot) else {
                return Err(AddressError::OutOfOrder(s.to_string()));
            };
            let mut chars = part.chars();
            if chars.next() != Some(prefix) {
                return Err(AddressError::OutOfOrder(s.to_string()));
            }
            let rest = chars.as_str();
            indices[slot] = if rest == "*" {
                0
            } else {
                rest.parse::<u32>()
                    .map_err(|_| AddressError::InvalidComponent {
                        input: s.to_string(),
                        component: part.to_string(),
                    })?
            };
            level = part_level;
        }

        Self::new(level, indices[0], indices[1], indices[2])
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
