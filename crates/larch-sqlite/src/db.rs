//! Per-connection database handle.

use std::ffi::c_int;
use std::sync::Arc;

use larch_cluster::Cluster;
use larch_core::GatewayOptions;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use snafu::ResultExt;
use tracing::debug;

use crate::error::ConfigureSnafu;
use crate::error::CreateDirectorySnafu;
use crate::error::OpenSnafu;
use crate::error::SqliteError;
use crate::stmt::Statement;
use crate::wal::CheckpointHook;

/// The local database of one gateway connection.
///
/// Owns the engine connection, the table of prepared statements, and the
/// registration state of the distributed checkpoint hook. A gateway holds
/// at most one of these for its whole lifetime.
pub struct ReplicatedDb {
    id: u32,
    // Field order matters for teardown: the hook unregisters and the
    // statements finalize before the connection closes.
    hook: Option<CheckpointHook>,
    stmts: Vec<Option<Statement>>,
    conn: Connection,
    cluster: Arc<dyn Cluster>,
}

impl ReplicatedDb {
    /// Open the database `name` under the options' data directory.
    ///
    /// Applies the options-driven VFS, page size, WAL journal mode, full
    /// synchronous durability, and disables the engine's own
    /// autocheckpoint so the gateway's distributed policy is the only
    /// checkpoint driver.
    pub fn open(
        name: &str,
        flags: u64,
        options: &GatewayOptions,
        cluster: Arc<dyn Cluster>,
    ) -> Result<Self, SqliteError> {
        let path = options.database_path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirectorySnafu { path: parent })?;
        }

        let open_flags = normalize_open_flags(flags);
        let conn = match &options.vfs {
            Some(vfs) => Connection::open_with_flags_and_vfs(&path, open_flags, vfs),
            None => Connection::open_with_flags(&path, open_flags),
        }
        .context(OpenSnafu { path })?;

        conn.pragma_update(None, "page_size", options.page_size).context(ConfigureSnafu)?;
        conn.pragma_update(None, "journal_mode", "WAL").context(ConfigureSnafu)?;
        conn.pragma_update(None, "synchronous", "FULL").context(ConfigureSnafu)?;
        // Must happen before the checkpoint hook is installed: the
        // autocheckpoint pragma claims the same engine hook slot.
        conn.pragma_update(None, "wal_autocheckpoint", 0).context(ConfigureSnafu)?;

        if let Some(plugin) = &options.wal_replication {
            debug!(plugin, name, "write path intercepted by WAL replication");
        }

        Ok(Self { id: 0, hook: None, stmts: Vec::new(), conn, cluster })
    }

    /// Database id; one database per connection, so always 0.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The underlying engine connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Install the distributed checkpoint hook and announce the handle to
    /// the cluster.
    pub fn join_cluster(&mut self, checkpoint_threshold: u32) {
        self.hook = Some(CheckpointHook::install(
            &self.conn,
            checkpoint_threshold,
            self.cluster.clone(),
        ));
        self.cluster.register(&self.conn);
    }

    /// Compile the first statement of `sql` and register it, returning its
    /// id. The registered statement may be empty when the text holds no
    /// executable statement.
    pub fn prepare(&mut self, sql: &str) -> Result<u32, SqliteError> {
        let slot = self.stmts.iter().position(Option::is_none).unwrap_or_else(|| {
            self.stmts.push(None);
            self.stmts.len() - 1
        });
        let id = slot as u32;

        let stmt = Statement::prepare(unsafe { self.conn.handle() }, id, sql)?;
        self.stmts[slot] = Some(stmt);
        Ok(id)
    }

    /// Look up a registered statement.
    pub fn stmt(&self, id: u32) -> Option<&Statement> {
        self.stmts.get(id as usize).and_then(Option::as_ref)
    }

    /// Look up a registered statement for mutation.
    pub fn stmt_mut(&mut self, id: u32) -> Option<&mut Statement> {
        self.stmts.get_mut(id as usize).and_then(Option::as_mut)
    }

    /// Destroy a registered statement. The id becomes reusable whether or
    /// not the engine reports an error from the statement's last
    /// evaluation.
    pub fn finalize(&mut self, id: u32) -> Result<(), SqliteError> {
        let stmt = self
            .stmts
            .get_mut(id as usize)
            .and_then(Option::take)
            .ok_or(SqliteError::NoSuchStatement { id })?;
        stmt.finalize()
    }

    /// Whether a statement with this id is registered.
    pub fn has_stmt(&self, id: u32) -> bool {
        self.stmt(id).is_some()
    }

    /// Number of registered statements, for diagnostics.
    pub fn stmt_count(&self) -> usize {
        self.stmts.iter().filter(|s| s.is_some()).count()
    }
}

impl std::fmt::Debug for ReplicatedDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicatedDb")
            .field("id", &self.id)
            .field("stmts", &self.stmt_count())
            .field("hooked", &self.hook.is_some())
            .finish_non_exhaustive()
    }
}

/// Map request open flags onto engine open flags, defaulting to
/// read-write-create when the client names no access mode.
fn normalize_open_flags(flags: u64) -> OpenFlags {
    let flags = OpenFlags::from_bits_truncate(flags as c_int);
    let access = OpenFlags::SQLITE_OPEN_READ_ONLY
        | OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE;
    if flags.intersection(access).is_empty() {
        flags | OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
    } else {
        flags
    }
}
