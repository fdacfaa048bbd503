//! Durable storage for recorded failures.

pub mod failure_store;

pub use failure_store::FailureStore;
