//! Cluster peer records.

use serde::Deserialize;
use serde::Serialize;

/// Describes one server participating in the cluster.
///
/// Returned in SERVERS responses to heartbeat requests so clients can keep
/// their view of the cluster topology current.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerInfo {
    /// Unique identifier of the server within the cluster.
    pub id: u64,
    /// Network address clients can dial, e.g. `10.0.0.1:9000`.
    pub address: String,
}

impl ServerInfo {
    /// Create a new server record.
    pub fn new(id: u64, address: impl Into<String>) -> Self {
        Self { id, address: address.into() }
    }
}
