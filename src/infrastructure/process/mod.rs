//! OS process adapters.

pub mod os_process;

pub use os_process::OsWorkerProcess;
