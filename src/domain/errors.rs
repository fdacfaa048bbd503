//! Domain errors for the loadfleet coordination core.

use thiserror::Error;

use super::models::{Address, AddressError, TargetType};

/// Precondition violations and infrastructure faults.
///
/// Faults observed in the fleet at runtime are not errors; they are recorded
/// as [`Failure`](super::models::Failure)s.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("No agents running")]
    NoAgentsRunning,

    #[error("No workers running")]
    NoWorkersRunning,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unknown agent: {0}")]
    UnknownAgent(Address),

    #[error("Could not find enough {target} workers: wanted {wanted}, found {found}")]
    NotEnoughWorkers {
        target: TargetType,
        wanted: usize,
        found: usize,
    },

    #[error(transparent)]
    InvalidAddress(#[from] AddressError),

    #[error("Run failed with {count} critical failure(s): {summary}")]
    CriticalFailures { count: usize, summary: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type FleetResult<T> = Result<T, FleetError>;
