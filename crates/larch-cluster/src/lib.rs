//! Cluster capability trait for the larch gateway.
//!
//! The gateway never talks to the replication layer directly; it consumes
//! the small capability set defined here. A production node implements
//! [`Cluster`] on top of its consensus machinery; tests and single-node
//! deployments use [`StaticCluster`].
//!
//! All operations are synchronous. The gateway runs single-threaded on its
//! transport's event loop, and cluster calls (the log barrier in
//! particular) block that loop by design; callers size their thread pools
//! accordingly.

mod local;

use larch_core::ServerInfo;
use larch_core::code;
use rusqlite::Connection;
use thiserror::Error;

pub use local::StaticCluster;

/// Error reported by a cluster operation.
///
/// Carries the engine-level integer code the gateway forwards to clients
/// in failure responses.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClusterError {
    /// The cluster cannot serve requests right now (no quorum, transport
    /// down, node shutting down).
    #[error("cluster unavailable: {reason}")]
    Unavailable {
        /// Human-readable description.
        reason: String,
    },

    /// The underlying engine or log reported a failure.
    #[error("engine failure (code {code}): {reason}")]
    Engine {
        /// Engine result code.
        code: i32,
        /// Human-readable description.
        reason: String,
    },
}

impl ClusterError {
    /// The engine-level code surfaced to clients.
    pub fn code(&self) -> i32 {
        match self {
            ClusterError::Unavailable { .. } => code::IOERR,
            ClusterError::Engine { code, .. } => *code,
        }
    }
}

/// Capabilities the gateway requires from the replication layer.
pub trait Cluster: Send + Sync {
    /// Address of the current leader, or `None` when the cluster has no
    /// leader.
    fn leader(&self) -> Option<String>;

    /// Current list of servers in the cluster.
    fn servers(&self) -> Result<Vec<ServerInfo>, ClusterError>;

    /// Hook invoked when the gateway opens a new local database handle.
    fn register(&self, db: &Connection);

    /// Block until the local state machine has applied all log entries up
    /// to the current committed index.
    fn barrier(&self) -> Result<(), ClusterError>;

    /// Perform a cluster-coordinated checkpoint of the given connection's
    /// WAL. Returns the number of frames backfilled.
    fn checkpoint(&self, db: &Connection) -> Result<u32, ClusterError>;
}
