use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use super::address::Address;

/// Classification of a reported fault.
///
/// `WorkerFinished` is not a fault. It is the completion signal and travels
/// through the same channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureType {
    WorkerException,
    WorkerOom,
    WorkerTimeout,
    WorkerExit,
    WorkerMembershipFailure,
    WorkerFinished,
}

impl FailureType {
    /// All variants, in reporting order.
    pub const ALL: [Self; 6] = [
        Self::WorkerException,
        Self::WorkerOom,
        Self::WorkerTimeout,
        Self::WorkerExit,
        Self::WorkerMembershipFailure,
        Self::WorkerFinished,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WorkerException => "WORKER_EXCEPTION",
            Self::WorkerOom => "WORKER_OOM",
            Self::WorkerTimeout => "WORKER_TIMEOUT",
            Self::WorkerExit => "WORKER_EXIT",
            Self::WorkerMembershipFailure => "WORKER_MEMBERSHIP_FAILURE",
            Self::WorkerFinished => "WORKER_FINISHED",
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::WorkerException => "Worker ran into an unhandled exception",
            Self::WorkerOom => "Worker ran out of memory",
            Self::WorkerTimeout => "Worker has not sent a message for a long time",
            Self::WorkerExit => "Worker terminated with a non-zero exit code",
            Self::WorkerMembershipFailure => "Worker lost its cluster membership",
            Self::WorkerFinished => "Worker finished",
        }
    }

    pub const fn is_worker_finished(self) -> bool {
        matches!(self, Self::WorkerFinished)
    }

    /// Whether this type terminates the reporting stream of a worker.
    pub const fn is_poison_pill(self) -> bool {
        matches!(self, Self::WorkerFinished)
    }

    /// Parse a comma-separated list such as `WORKER_TIMEOUT, WORKER_EXIT`.
    ///
    /// Blank entries are ignored.
    pub fn parse_set(input: &str) -> anyhow::Result<HashSet<Self>> {
        input
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| anyhow::anyhow!("Invalid failure type: {s}"))
    }
}

/// An immutable report of something going wrong in the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub message: String,

    pub failure_type: FailureType,

    /// Lowest entity that observed the failure.
    pub source: Address,

    /// Agent-level ancestor of `source`.
    pub agent_address: Address,

    /// Network endpoint of the reporting process.
    pub endpoint: String,

    pub worker_id: String,

    #[serde(default)]
    pub test_id: Option<String>,

    /// Captured error or stack text.
    #[serde(default)]
    pub cause: Option<String>,

    pub timestamp: DateTime<Utc>,
}

impl Failure {
    /// Start building a failure observed at `source`.
    ///
    /// The agent address is derived from `source`; a root source is
    /// attributed to the root.
    pub fn new(failure_type: FailureType, source: Address, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            failure_type,
            source,
            agent_address: source.agent_address().unwrap_or(Address::ROOT),
            endpoint: String::new(),
            worker_id: String::new(),
            test_id: None,
            cause: None,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    #[must_use]
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    #[must_use]
    pub fn with_test_id(mut self, test_id: Option<String>) -> Self {
        self.test_id = test_id;
        self
    }

    #[must_use]
    pub fn with_cause(mut self, cause: Option<String>) -> Self {
        self.cause = cause;
        self
    }

    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}: {}", self.failure_type, self.source, self.message)?;
        if let Some(test_id) = &self.test_id {
            write!(f, " (test {test_id})")?;
        }
        Ok(())
    }
}
