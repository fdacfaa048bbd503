//! Cluster membership port.

use std::collections::HashSet;
use std::io;

/// Point-in-time view of the cluster under test.
///
/// Endpoints are compared verbatim against the endpoint a worker registered
/// with, so implementations must use the same `host:port` rendering.
pub trait ClusterMembership: Send + Sync {
    /// Current member endpoints. Errors are treated as transient.
    fn members(&self) -> io::Result<HashSet<String>>;
}
