//! Domain ports (interfaces) for the loadfleet core.

pub mod cluster;
pub mod failure_reporter;
pub mod process;

pub use cluster::ClusterMembership;
pub use failure_reporter::FailureReporter;
pub use process::{ProcessExit, WorkerProcess};
