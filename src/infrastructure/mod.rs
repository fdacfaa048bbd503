//! Infrastructure layer module
//!
//! Adapters for the domain ports and the ambient plumbing:
//! - Configuration management (figment)
//! - Logging infrastructure (tracing)
//! - Failure persistence
//! - OS worker processes
//! - Cluster membership views
//! - The worker scratch directory

pub mod config;
pub mod logging;
pub mod membership;
pub mod persistence;
pub mod process;
pub mod scratch;
