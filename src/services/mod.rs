pub mod component_registry;
pub mod failure_collector;

pub use component_registry::ComponentRegistry;
pub use failure_collector::{FailureCollector, FailureSummary};
