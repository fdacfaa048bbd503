//! Loadfleet - fleet coordination core for distributed load testing
//!
//! A coordinator drives agents, each agent supervises worker processes, and
//! each worker runs test instances. This crate keeps that tree consistent
//! under partial failure.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): addresses, fleet records, the failure taxonomy and ports
//! - **Service Layer** (`services`): the topology registry and the failure collector
//! - **Application Layer** (`application`): worker process table and health supervision
//! - **Infrastructure Layer** (`infrastructure`): config, logging, persistence, OS processes
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use loadfleet::services::FailureCollector;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let collector = FailureCollector::new("failures", Default::default());
//!     // ... run the test ...
//!     collector.log_failure_info().await?;
//!     Ok(())
//! }
//! ```

pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::{HealthSupervisor, PassReport, SupervisorSettings, WorkerProcessManager};
pub use domain::models::{
    Address, AddressLevel, AgentRecord, Config, Failure, FailureType, TargetType, WorkerKind,
    WorkerRecord, WorkerSettings,
};
pub use domain::ports::{ClusterMembership, FailureReporter, ProcessExit, WorkerProcess};
pub use domain::{FleetError, FleetResult};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{ComponentRegistry, FailureCollector};
