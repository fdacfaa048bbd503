pub mod address;
pub mod agent;
pub mod config;
pub mod failure;
pub mod test_case;
pub mod worker;

pub use address::{Address, AddressError, AddressLevel};
pub use agent::{AgentRecord, WorkerMode};
pub use config::{Config, CoordinatorConfig, LoggingConfig, SupervisorConfig};
pub use failure::{Failure, FailureType};
pub use test_case::{TestCase, TestRecord, TestSuite};
pub use worker::{TargetType, WorkerKind, WorkerRecord, WorkerSettings};
