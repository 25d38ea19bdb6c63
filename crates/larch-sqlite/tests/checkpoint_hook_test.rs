//! Integration tests for the distributed WAL checkpoint trigger.
//!
//! Exercises the commit hook against a live database: the cluster
//! checkpoint fires once the WAL crosses the threshold, stays quiet below
//! it, and is postponed while a trailing reader holds a read transaction.

use std::sync::Arc;

use larch_cluster::StaticCluster;
use larch_core::GatewayOptions;
use larch_core::SqlValue;
use larch_sqlite::ReplicatedDb;
use rusqlite::Connection;
use tempfile::TempDir;

/// Helper: options rooted in a temporary directory with a small
/// checkpoint threshold so a handful of commits crosses it.
fn test_options(dir: &TempDir) -> GatewayOptions {
    GatewayOptions {
        data_dir: dir.path().to_path_buf(),
        checkpoint_threshold: 4,
        ..Default::default()
    }
}

fn open_joined(dir: &TempDir, cluster: Arc<StaticCluster>) -> ReplicatedDb {
    let options = test_options(dir);
    let mut db = ReplicatedDb::open("ckpt.db", 0, &options, cluster).expect("open");
    db.join_cluster(options.checkpoint_threshold);
    db
}

/// Run one statement through the registry, driving the commit path.
fn run(db: &mut ReplicatedDb, sql: &str, params: &[SqlValue]) {
    let id = db.prepare(sql).expect("prepare");
    let stmt = db.stmt_mut(id).expect("stmt");
    stmt.bind(params).expect("bind");
    stmt.exec().expect("exec");
    db.finalize(id).expect("finalize");
}

#[test]
fn test_checkpoint_fires_past_threshold() {
    let dir = TempDir::new().expect("tempdir");
    let cluster = Arc::new(StaticCluster::single("10.0.0.1:9000"));
    let mut db = open_joined(&dir, cluster.clone());

    assert_eq!(cluster.registrations(), 1);

    run(&mut db, "CREATE TABLE t (x INTEGER)", &[]);
    for i in 0..20 {
        run(&mut db, "INSERT INTO t VALUES (?1)", &[SqlValue::Integer(i)]);
    }

    assert!(cluster.checkpoints() >= 1, "WAL past threshold must trigger a checkpoint");
}

#[test]
fn test_no_checkpoint_below_threshold() {
    let dir = TempDir::new().expect("tempdir");
    let cluster = Arc::new(StaticCluster::single("10.0.0.1:9000"));
    let options = GatewayOptions {
        data_dir: dir.path().to_path_buf(),
        checkpoint_threshold: 100_000,
        ..Default::default()
    };
    let mut db = ReplicatedDb::open("quiet.db", 0, &options, cluster.clone()).expect("open");
    db.join_cluster(options.checkpoint_threshold);

    run(&mut db, "CREATE TABLE t (x INTEGER)", &[]);
    for i in 0..20 {
        run(&mut db, "INSERT INTO t VALUES (?1)", &[SqlValue::Integer(i)]);
    }

    assert_eq!(cluster.checkpoints(), 0);
}

#[test]
fn test_trailing_reader_postpones_checkpoint() {
    let dir = TempDir::new().expect("tempdir");
    let cluster = Arc::new(StaticCluster::single("10.0.0.1:9000"));
    let mut db = open_joined(&dir, cluster.clone());

    run(&mut db, "CREATE TABLE t (x INTEGER)", &[]);
    run(&mut db, "INSERT INTO t VALUES (0)", &[]);

    // A second connection opens a read transaction pinned to the current
    // log position.
    let reader = Connection::open(dir.path().join("ckpt.db")).expect("reader open");
    reader.execute_batch("BEGIN").expect("begin");
    let _: i64 = reader
        .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
        .expect("read");

    let before = cluster.checkpoints();
    for i in 1..20 {
        run(&mut db, "INSERT INTO t VALUES (?1)", &[SqlValue::Integer(i)]);
    }
    assert_eq!(
        cluster.checkpoints(),
        before,
        "a trailing reader must postpone the checkpoint"
    );

    // Once the reader finishes, the next commit checkpoints.
    reader.execute_batch("COMMIT").expect("commit");
    drop(reader);
    run(&mut db, "INSERT INTO t VALUES (100)", &[]);
    assert!(cluster.checkpoints() > before);
}
