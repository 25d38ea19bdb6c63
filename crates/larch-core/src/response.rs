//! Gateway response protocol.

use serde::Deserialize;
use serde::Serialize;

use crate::server::ServerInfo;
use crate::value::SqlValue;

/// End-of-batch marker on a ROWS response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RowsEof {
    /// More rows follow in a later batch.
    Part,
    /// This batch is terminal for the query.
    Done,
}

/// One response produced by the gateway.
///
/// A closed sum type: every variant owns its payload outright, so
/// releasing a flushed response is an ordinary drop and no variant shares
/// ownership of buffers with the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Response {
    /// The request failed; `code` is the engine's integer result code and
    /// `message` a human-readable description.
    Failure {
        /// Engine result code (see [`crate::code`]).
        code: i32,
        /// Human-readable error text.
        message: String,
    },

    /// Address of the current cluster leader.
    Server {
        /// Network address of the leader.
        address: String,
    },

    /// Handshake reply to a CLIENT request.
    Welcome {
        /// Heartbeat timeout, in milliseconds, the client must honor.
        heartbeat_timeout: u64,
    },

    /// Current cluster peer list, replied to a heartbeat.
    Servers {
        /// All servers known to the cluster.
        servers: Vec<ServerInfo>,
    },

    /// A database was opened for this connection.
    Db {
        /// Database id; one database per connection, so always 0.
        id: u32,
    },

    /// A statement was compiled.
    Stmt {
        /// Owning database id.
        db_id: u32,
        /// Statement id, unique within the database.
        stmt_id: u32,
        /// Number of bind placeholders in the compiled form.
        params: u64,
    },

    /// A statement ran to completion.
    Result {
        /// Rowid of the most recent successful insert on the connection.
        last_insert_id: u64,
        /// Rows changed by the statement.
        rows_affected: u64,
    },

    /// One batch of a streaming query result.
    Rows {
        /// Result column names, in statement order.
        columns: Vec<String>,
        /// Row tuples in engine order.
        rows: Vec<Vec<SqlValue>>,
        /// Whether more batches follow.
        eof: RowsEof,
    },

    /// Success with no payload.
    Empty,
}

impl Response {
    /// Build a failure response.
    pub fn failure(code: i32, message: impl Into<String>) -> Self {
        Response::Failure { code, message: message.into() }
    }

    /// True when this response reports a failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, Response::Failure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_constructor() {
        let r = Response::failure(5, "busy");
        assert!(r.is_failure());
        match r {
            Response::Failure { code, message } => {
                assert_eq!(code, 5);
                assert_eq!(message, "busy");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_rows_eof_markers_differ() {
        assert_ne!(RowsEof::Part, RowsEof::Done);
    }
}
