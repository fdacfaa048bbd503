pub mod health_supervisor;
pub mod worker_process_manager;

pub use health_supervisor::{HealthSupervisor, PassReport, SupervisorSettings};
pub use worker_process_manager::{ManagedWorker, WorkerProcessManager};
