//! Domain layer for the loadfleet coordination core
//!
//! Addresses, fleet records, the failure taxonomy and the ports the
//! application layer talks to.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{FleetError, FleetResult};
