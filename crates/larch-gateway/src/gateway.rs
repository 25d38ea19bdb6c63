//! The gateway state machine.

use std::sync::Arc;

use larch_cluster::Cluster;
use larch_core::GatewayOptions;
use larch_core::Request;
use larch_core::Response;
use larch_core::RowsEof;
use larch_core::SqlValue;
use larch_core::code;
use larch_core::constants::MAX_REQUESTS;
use larch_sqlite::ReplicatedDb;
use larch_sqlite::SqliteError;
use thiserror::Error;
use tracing::debug;
use tracing::warn;

use crate::sink::ResponseSink;
use crate::sink::SlotId;

/// Errors returned by [`Gateway::handle`] without a rendered response.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The slot designated for the request already holds an in-flight
    /// request. No response is flushed for this outcome.
    #[error("concurrent request limit exceeded")]
    ConcurrentRequestLimit,
}

/// One pre-allocated request context.
#[derive(Debug, Default)]
struct Slot {
    /// The in-flight request, held until its final response is flushed.
    request: Option<Request>,
    /// Suspended streaming cursor: the id of the statement to resume.
    cursor: Option<u32>,
    /// The rendered response awaiting its `flushed` acknowledgment.
    response: Option<Response>,
}

/// The per-connection gateway.
///
/// Composes the cluster interface, the read-only options, the optional
/// local database, and two request slots. See the crate docs for the
/// concurrency and streaming model.
pub struct Gateway<S: ResponseSink> {
    client_id: u64,
    heartbeat: u64,
    cluster: Arc<dyn Cluster>,
    options: GatewayOptions,
    sink: S,
    db: Option<ReplicatedDb>,
    slots: [Slot; MAX_REQUESTS],
}

impl<S: ResponseSink> Gateway<S> {
    /// Create a gateway for one freshly accepted connection.
    pub fn new(cluster: Arc<dyn Cluster>, options: GatewayOptions, sink: S) -> Self {
        Self {
            client_id: 0,
            heartbeat: 0,
            cluster,
            options,
            sink,
            db: None,
            slots: std::array::from_fn(|_| Slot::default()),
        }
    }

    /// Client identifier assigned at handshake. Registration is currently
    /// a placeholder, so this is always 0.
    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    /// Timestamp of the most recent heartbeat, monotone non-decreasing.
    pub fn heartbeat(&self) -> u64 {
        self.heartbeat
    }

    /// The connection's database, once opened.
    pub fn db(&self) -> Option<&ReplicatedDb> {
        self.db.as_ref()
    }

    /// Whether the slot designated for this request is free.
    pub fn ok_to_accept(&self, request: &Request) -> bool {
        self.slots[SlotId::for_request(request).index()].request.is_none()
    }

    /// Whether a streaming query is suspended on the data slot.
    pub fn is_streaming(&self) -> bool {
        self.slots[SlotId::Data.index()].cursor.is_some()
    }

    /// Accept and run one request.
    ///
    /// On success the handler has run and the sink's `flush` was invoked
    /// exactly once; the transport must answer with
    /// [`flushed`](Self::flushed) for the same slot before that slot
    /// accepts another request. When the slot is busy the request is
    /// rejected without a response.
    pub fn handle(&mut self, request: Request) -> Result<(), GatewayError> {
        if !self.ok_to_accept(&request) {
            warn!(opcode = request.opcode(), "concurrent request limit exceeded");
            return Err(GatewayError::ConcurrentRequestLimit);
        }

        let slot_id = SlotId::for_request(&request);
        debug!(opcode = request.opcode(), slot = ?slot_id, "dispatching request");
        self.slots[slot_id.index()].request = Some(request.clone());

        let response = self.dispatch(&request).unwrap_or_else(|failure| failure);
        self.finish(slot_id, response);
        Ok(())
    }

    /// Completion callback from the transport: the response flushed for
    /// `slot` has been fully written.
    ///
    /// Releases the response, then either resumes a suspended streaming
    /// query with the next batch or frees the slot for a new request.
    pub fn flushed(&mut self, slot: SlotId) {
        let idx = slot.index();
        self.slots[idx].response = None;

        match self.slots[idx].cursor {
            Some(stmt_id) => {
                let response = self.query_batch(stmt_id);
                self.finish(slot, response);
            }
            None => {
                self.slots[idx].request = None;
            }
        }
    }

    /// Advisory callback: a queued response will never be flushed.
    ///
    /// Deliberately a no-op. The contract is that `aborted` implies no
    /// prior `flush` for the response, so there is no slot state to
    /// unwind here.
    pub fn aborted(&mut self, _slot: SlotId) {}

    /// Store the rendered response and hand it to the transport.
    fn finish(&mut self, slot_id: SlotId, response: Response) {
        let response = self.slots[slot_id.index()].response.insert(response);
        self.sink.flush(slot_id, response);
    }

    fn dispatch(&mut self, request: &Request) -> Result<Response, Response> {
        match request {
            Request::Leader => self.leader(),
            Request::Client { id } => self.client(*id),
            Request::Heartbeat { timestamp } => self.heartbeat_request(*timestamp),
            Request::Open { name, flags, .. } => self.open(name, *flags),
            Request::Prepare { db_id, sql } => self.prepare(*db_id, sql),
            Request::Exec { db_id, stmt_id, params } => self.exec(*db_id, *stmt_id, params),
            Request::Query { db_id, stmt_id, params } => self.query(*db_id, *stmt_id, params),
            Request::Finalize { db_id, stmt_id } => self.finalize(*db_id, *stmt_id),
            Request::ExecSql { db_id, sql, params } => self.exec_sql(*db_id, sql, params),
            Request::QuerySql { db_id, sql, params } => self.query_sql(*db_id, sql, params),
            Request::Interrupt => self.interrupt(),
            Request::Unknown { opcode } => {
                Ok(Response::failure(code::ERROR, format!("invalid request type {opcode}")))
            }
        }
    }

    // =========================================================================
    // Control plane
    // =========================================================================

    fn leader(&mut self) -> Result<Response, Response> {
        match self.cluster.leader() {
            Some(address) => Ok(Response::Server { address }),
            // Missing leader keeps the historical NOMEM code; clients of
            // the original wire protocol match on it.
            None => Err(Response::failure(code::NOMEM, "failed to get cluster leader")),
        }
    }

    fn client(&mut self, _id: u64) -> Result<Response, Response> {
        // TODO: register the client with the cluster once client-side
        // session tracking lands; until then every client is id 0.
        Ok(Response::Welcome { heartbeat_timeout: self.options.heartbeat_timeout })
    }

    fn heartbeat_request(&mut self, timestamp: u64) -> Result<Response, Response> {
        let servers = self
            .cluster
            .servers()
            .map_err(|e| Response::failure(e.code(), "failed to get cluster servers"))?;

        self.heartbeat = self.heartbeat.max(timestamp);
        Ok(Response::Servers { servers })
    }

    fn interrupt(&mut self) -> Result<Response, Response> {
        let cursor = self.slots[SlotId::Data.index()].cursor.take();
        if let Some(stmt_id) = cursor {
            debug!(stmt_id, "interrupting streaming query");
            if let Some(db) = self.db.as_mut()
                && let Some(stmt) = db.stmt_mut(stmt_id)
            {
                stmt.reset();
            }
        }

        // Mid-stream the data slot still owes the transport a `flushed`
        // for the batch in flight; the slot frees itself there. With no
        // response in flight it frees immediately.
        let data = &mut self.slots[SlotId::Data.index()];
        if data.response.is_none() {
            data.request = None;
        }

        Ok(Response::Empty)
    }

    // =========================================================================
    // Database lifecycle
    // =========================================================================

    fn open(&mut self, name: &str, flags: u64) -> Result<Response, Response> {
        if self.db.is_some() {
            return Err(Response::failure(
                code::BUSY,
                "a database for this connection is already open",
            ));
        }

        let mut db = ReplicatedDb::open(name, flags, &self.options, self.cluster.clone())
            .map_err(|e| failure_from(&e))?;
        db.join_cluster(self.options.checkpoint_threshold);

        let id = db.id();
        self.db = Some(db);
        Ok(Response::Db { id })
    }

    // =========================================================================
    // Statement lifecycle
    // =========================================================================

    fn prepare(&mut self, db_id: u32, sql: &str) -> Result<Response, Response> {
        self.barrier()?;
        let db = self.db_mut(db_id)?;

        let stmt_id = db.prepare(sql).map_err(|e| failure_from(&e))?;
        let params = db.stmt(stmt_id).map(|s| s.param_count()).unwrap_or(0);
        Ok(Response::Stmt { db_id, stmt_id, params })
    }

    fn exec(&mut self, db_id: u32, stmt_id: u32, params: &[SqlValue]) -> Result<Response, Response> {
        self.barrier()?;
        let db = self.db_mut(db_id)?;
        let stmt = db.stmt_mut(stmt_id).ok_or_else(|| stmt_not_found(stmt_id))?;

        stmt.bind(params).map_err(|e| failure_from(&e))?;
        let result = stmt.exec().map_err(|e| failure_from(&e))?;
        Ok(Response::Result {
            last_insert_id: result.last_insert_id,
            rows_affected: result.rows_affected,
        })
    }

    fn query(&mut self, db_id: u32, stmt_id: u32, params: &[SqlValue]) -> Result<Response, Response> {
        self.barrier()?;
        let db = self.db_mut(db_id)?;
        let stmt = db.stmt_mut(stmt_id).ok_or_else(|| stmt_not_found(stmt_id))?;

        stmt.bind(params).map_err(|e| failure_from(&e))?;
        Ok(self.query_batch(stmt_id))
    }

    fn finalize(&mut self, db_id: u32, stmt_id: u32) -> Result<Response, Response> {
        self.barrier()?;
        let db = self.db_mut(db_id)?;

        if !db.has_stmt(stmt_id) {
            return Err(stmt_not_found(stmt_id));
        }
        db.finalize(stmt_id).map_err(|e| failure_from(&e))?;
        Ok(Response::Empty)
    }

    fn exec_sql(&mut self, db_id: u32, sql: &str, params: &[SqlValue]) -> Result<Response, Response> {
        self.barrier()?;
        let db = self.db_mut(db_id)?;

        // Nothing executed yet; an input with no executable statement
        // exits cleanly with an empty response.
        let mut response = Response::Empty;
        let mut sql = sql.to_string();

        while !sql.is_empty() {
            let stmt_id = db.prepare(&sql).map_err(|e| failure_from(&e))?;
            if db.stmt(stmt_id).is_none_or(|s| s.is_empty()) {
                finalize_quietly(db, stmt_id);
                break;
            }

            // The same tuple binds to every statement of the text; only
            // well-defined for single-statement input.
            if let Some(stmt) = db.stmt_mut(stmt_id)
                && let Err(e) = stmt.bind(params)
            {
                let failure = failure_from(&e);
                finalize_quietly(db, stmt_id);
                return Err(failure);
            }

            match db.stmt_mut(stmt_id).map(|s| s.exec()) {
                Some(Ok(result)) => {
                    response = Response::Result {
                        last_insert_id: result.last_insert_id,
                        rows_affected: result.rows_affected,
                    };
                }
                Some(Err(e)) => {
                    let failure = failure_from(&e);
                    finalize_quietly(db, stmt_id);
                    return Err(failure);
                }
                None => break,
            }

            sql = db
                .stmt(stmt_id)
                .and_then(|s| s.tail())
                .map(str::to_string)
                .unwrap_or_default();
            finalize_quietly(db, stmt_id);
        }

        Ok(response)
    }

    fn query_sql(&mut self, db_id: u32, sql: &str, params: &[SqlValue]) -> Result<Response, Response> {
        self.barrier()?;
        let db = self.db_mut(db_id)?;

        let stmt_id = db.prepare(sql).map_err(|e| failure_from(&e))?;
        if db.stmt(stmt_id).is_none_or(|s| s.is_empty()) {
            finalize_quietly(db, stmt_id);
            return Err(Response::failure(code::ERROR, "empty statement"));
        }

        if let Some(stmt) = db.stmt_mut(stmt_id)
            && let Err(e) = stmt.bind(params)
        {
            let failure = failure_from(&e);
            finalize_quietly(db, stmt_id);
            return Err(failure);
        }

        Ok(self.query_batch(stmt_id))
    }

    // =========================================================================
    // Query streaming
    // =========================================================================

    /// Produce one batch of rows for the statement, updating the data
    /// slot's suspended cursor according to the batch's end marker.
    fn query_batch(&mut self, stmt_id: u32) -> Response {
        let budget = self.options.query_batch_rows as usize;

        let Some(stmt) = self.db.as_mut().and_then(|db| db.stmt_mut(stmt_id)) else {
            self.slots[SlotId::Data.index()].cursor = None;
            return stmt_not_found(stmt_id);
        };

        match stmt.query_batch(budget) {
            Ok(batch) => {
                self.slots[SlotId::Data.index()].cursor =
                    (batch.eof == RowsEof::Part).then_some(stmt_id);
                Response::Rows { columns: batch.columns, rows: batch.rows, eof: batch.eof }
            }
            Err(e) => {
                self.slots[SlotId::Data.index()].cursor = None;
                failure_from(&e)
            }
        }
    }

    // =========================================================================
    // Shared prerequisites
    // =========================================================================

    /// Ensure reads observe a state at least as fresh as the latest
    /// committed log index.
    fn barrier(&self) -> Result<(), Response> {
        self.cluster
            .barrier()
            .map_err(|e| Response::failure(e.code(), "raft barrier failed"))
    }

    fn db_mut(&mut self, db_id: u32) -> Result<&mut ReplicatedDb, Response> {
        match self.db.as_mut() {
            Some(db) if db.id() == db_id => Ok(db),
            _ => Err(Response::failure(code::NOTFOUND, format!("no db with id {db_id}"))),
        }
    }
}

/// Render an engine error as a failure response, carrying its code and
/// message verbatim.
fn failure_from(err: &SqliteError) -> Response {
    Response::failure(err.code(), err.to_string())
}

fn stmt_not_found(stmt_id: u32) -> Response {
    Response::failure(code::NOTFOUND, format!("no stmt with id {stmt_id}"))
}

/// Destroy a statement whose outcome cannot change the response any more.
fn finalize_quietly(db: &mut ReplicatedDb, stmt_id: u32) {
    if let Err(e) = db.finalize(stmt_id) {
        warn!(stmt_id, error = %e, "finalize failed after statement ran");
    }
}
