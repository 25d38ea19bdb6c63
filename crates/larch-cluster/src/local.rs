//! In-process cluster implementation.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use larch_core::ServerInfo;
use larch_core::code;
use rusqlite::Connection;
use tracing::debug;

use crate::Cluster;
use crate::ClusterError;

/// A [`Cluster`] with a fixed topology.
///
/// Serves two purposes: the cluster double for gateway tests, and a usable
/// implementation for single-node deployments where barrier and leader
/// discovery are trivial. Checkpoints run a real passive WAL truncation on
/// the offered connection; invocation counters let tests observe the
/// gateway's swallowed-by-contract calls.
pub struct StaticCluster {
    leader: Option<String>,
    servers: Vec<ServerInfo>,
    fail_barrier: AtomicBool,
    fail_servers: AtomicBool,
    registrations: AtomicU32,
    checkpoints: AtomicU32,
}

impl StaticCluster {
    /// Build a cluster with the given leader address and peer list.
    pub fn new(leader: Option<String>, servers: Vec<ServerInfo>) -> Self {
        Self {
            leader,
            servers,
            fail_barrier: AtomicBool::new(false),
            fail_servers: AtomicBool::new(false),
            registrations: AtomicU32::new(0),
            checkpoints: AtomicU32::new(0),
        }
    }

    /// A single-node cluster that leads itself.
    pub fn single(address: impl Into<String>) -> Self {
        let address = address.into();
        Self::new(Some(address.clone()), vec![ServerInfo::new(1, address)])
    }

    /// A cluster with no leader and no peers.
    pub fn leaderless() -> Self {
        Self::new(None, Vec::new())
    }

    /// Make subsequent barrier calls fail.
    pub fn set_fail_barrier(&self, fail: bool) {
        self.fail_barrier.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent server listings fail.
    pub fn set_fail_servers(&self, fail: bool) {
        self.fail_servers.store(fail, Ordering::SeqCst);
    }

    /// How many local handles have been registered.
    pub fn registrations(&self) -> u32 {
        self.registrations.load(Ordering::SeqCst)
    }

    /// How many checkpoints have been requested.
    pub fn checkpoints(&self) -> u32 {
        self.checkpoints.load(Ordering::SeqCst)
    }
}

impl Cluster for StaticCluster {
    fn leader(&self) -> Option<String> {
        self.leader.clone()
    }

    fn servers(&self) -> Result<Vec<ServerInfo>, ClusterError> {
        if self.fail_servers.load(Ordering::SeqCst) {
            return Err(ClusterError::Unavailable { reason: "server list unavailable".into() });
        }
        Ok(self.servers.clone())
    }

    fn register(&self, _db: &Connection) {
        self.registrations.fetch_add(1, Ordering::SeqCst);
    }

    fn barrier(&self) -> Result<(), ClusterError> {
        if self.fail_barrier.load(Ordering::SeqCst) {
            return Err(ClusterError::Engine {
                code: code::IOERR,
                reason: "log replay unavailable".into(),
            });
        }
        Ok(())
    }

    fn checkpoint(&self, db: &Connection) -> Result<u32, ClusterError> {
        self.checkpoints.fetch_add(1, Ordering::SeqCst);

        // TRUNCATE mode: checkpoint and truncate the WAL file. The pragma
        // reports (busy, log, checkpointed); the third column is the number
        // of frames backfilled into the database.
        let mut backfilled: i32 = 0;
        db.pragma_update_and_check(None, "wal_checkpoint", "TRUNCATE", |row| {
            backfilled = row.get(2)?;
            Ok(())
        })
        .map_err(|e| ClusterError::Engine { code: code::IOERR, reason: e.to_string() })?;

        debug!(frames = backfilled, "local checkpoint completed");
        Ok(backfilled.max(0) as u32)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn wal_connection(dir: &TempDir) -> Connection {
        let conn = Connection::open(dir.path().join("cluster.db")).expect("open");
        conn.pragma_update(None, "journal_mode", "WAL").expect("wal mode");
        conn
    }

    #[test]
    fn test_single_node_topology() {
        let cluster = StaticCluster::single("10.0.0.1:9000");
        assert_eq!(cluster.leader(), Some("10.0.0.1:9000".to_string()));
        let servers = cluster.servers().expect("servers");
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].address, "10.0.0.1:9000");
    }

    #[test]
    fn test_leaderless_cluster_has_no_leader() {
        let cluster = StaticCluster::leaderless();
        assert_eq!(cluster.leader(), None);
        assert!(cluster.servers().expect("servers").is_empty());
    }

    #[test]
    fn test_barrier_failure_toggle() {
        let cluster = StaticCluster::single("a:1");
        cluster.barrier().expect("barrier passes by default");
        cluster.set_fail_barrier(true);
        let err = cluster.barrier().expect_err("barrier must fail");
        assert_eq!(err.code(), code::IOERR);
        cluster.set_fail_barrier(false);
        cluster.barrier().expect("barrier recovers");
    }

    #[test]
    fn test_servers_failure_toggle() {
        let cluster = StaticCluster::single("a:1");
        cluster.set_fail_servers(true);
        assert!(cluster.servers().is_err());
    }

    #[test]
    fn test_checkpoint_truncates_wal() {
        let dir = TempDir::new().expect("tempdir");
        let conn = wal_connection(&dir);
        conn.execute("CREATE TABLE t (x INTEGER)", []).expect("create");
        for i in 0..100 {
            conn.execute("INSERT INTO t VALUES (?1)", [i]).expect("insert");
        }

        let cluster = StaticCluster::single("a:1");
        cluster.checkpoint(&conn).expect("checkpoint");
        assert_eq!(cluster.checkpoints(), 1);

        // After TRUNCATE the WAL file is empty.
        let wal_len = std::fs::metadata(dir.path().join("cluster.db-wal"))
            .map(|m| m.len())
            .unwrap_or(0);
        assert_eq!(wal_len, 0);
    }

    #[test]
    fn test_register_counts_handles() {
        let dir = TempDir::new().expect("tempdir");
        let conn = wal_connection(&dir);
        let cluster = StaticCluster::single("a:1");
        cluster.register(&conn);
        cluster.register(&conn);
        assert_eq!(cluster.registrations(), 2);
    }
}
