//! Failure reporting port.

use async_trait::async_trait;

use crate::domain::errors::FleetResult;
use crate::domain::models::Failure;

/// Sink for failures detected anywhere in the fleet.
///
/// On the coordinator this is the failure collector itself; on an agent it
/// would be the transport that forwards to the coordinator.
#[async_trait]
pub trait FailureReporter: Send + Sync {
    async fn report(&self, failure: Failure) -> FleetResult<()>;
}
