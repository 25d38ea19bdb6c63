//! Client request protocol.

use serde::Deserialize;
use serde::Serialize;

use crate::value::SqlValue;

/// Wire opcode for LEADER.
pub const OPCODE_LEADER: u8 = 0;
/// Wire opcode for CLIENT.
pub const OPCODE_CLIENT: u8 = 1;
/// Wire opcode for HEARTBEAT.
pub const OPCODE_HEARTBEAT: u8 = 2;
/// Wire opcode for OPEN.
pub const OPCODE_OPEN: u8 = 3;
/// Wire opcode for PREPARE.
pub const OPCODE_PREPARE: u8 = 4;
/// Wire opcode for EXEC.
pub const OPCODE_EXEC: u8 = 5;
/// Wire opcode for QUERY.
pub const OPCODE_QUERY: u8 = 6;
/// Wire opcode for FINALIZE.
pub const OPCODE_FINALIZE: u8 = 7;
/// Wire opcode for EXEC_SQL.
pub const OPCODE_EXEC_SQL: u8 = 8;
/// Wire opcode for QUERY_SQL.
pub const OPCODE_QUERY_SQL: u8 = 9;
/// Wire opcode for INTERRUPT.
pub const OPCODE_INTERRUPT: u8 = 10;

/// One decoded client request.
///
/// Defines every operation a client can ask of its gateway. The framing
/// codec decodes inbound frames into this enum; frames whose opcode the
/// codec does not recognize surface as [`Request::Unknown`] so the gateway
/// can render the protocol-mandated failure instead of dropping them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Request {
    /// Ask for the address of the current cluster leader.
    Leader,

    /// Register the client. Registration is currently a placeholder; the
    /// response reports the heartbeat timeout the client must honor.
    Client {
        /// Client-chosen identifier.
        id: u64,
    },

    /// Periodic liveness probe; the response carries the peer list.
    Heartbeat {
        /// Client wall-clock timestamp in milliseconds.
        timestamp: u64,
    },

    /// Open the connection's database.
    Open {
        /// Database name, resolved under the gateway's data directory.
        name: String,
        /// Engine open flags.
        flags: u64,
        /// VFS name requested by the client. Ignored: the gateway's own
        /// options decide which VFS to use.
        vfs: Option<String>,
    },

    /// Compile a SQL statement.
    Prepare {
        /// Database id from the DB response.
        db_id: u32,
        /// SQL text to compile.
        sql: String,
    },

    /// Run a prepared statement to completion.
    Exec {
        /// Database id.
        db_id: u32,
        /// Statement id from the STMT response.
        stmt_id: u32,
        /// Values bound to the statement's parameters, in order.
        params: Vec<SqlValue>,
    },

    /// Stream rows from a prepared statement.
    Query {
        /// Database id.
        db_id: u32,
        /// Statement id.
        stmt_id: u32,
        /// Values bound to the statement's parameters, in order.
        params: Vec<SqlValue>,
    },

    /// Destroy a prepared statement.
    Finalize {
        /// Database id.
        db_id: u32,
        /// Statement id.
        stmt_id: u32,
    },

    /// Compile and run SQL text, possibly containing multiple statements.
    ExecSql {
        /// Database id.
        db_id: u32,
        /// SQL text.
        sql: String,
        /// Parameter values. Only well-defined for single-statement text.
        params: Vec<SqlValue>,
    },

    /// Compile a single SQL statement and stream its rows.
    QuerySql {
        /// Database id.
        db_id: u32,
        /// SQL text.
        sql: String,
        /// Parameter values.
        params: Vec<SqlValue>,
    },

    /// Cancel an in-progress streaming query.
    Interrupt,

    /// A frame whose opcode the codec did not recognize.
    Unknown {
        /// The unrecognized opcode.
        opcode: u8,
    },
}

impl Request {
    /// The wire opcode of this request.
    pub fn opcode(&self) -> u8 {
        match self {
            Request::Leader => OPCODE_LEADER,
            Request::Client { .. } => OPCODE_CLIENT,
            Request::Heartbeat { .. } => OPCODE_HEARTBEAT,
            Request::Open { .. } => OPCODE_OPEN,
            Request::Prepare { .. } => OPCODE_PREPARE,
            Request::Exec { .. } => OPCODE_EXEC,
            Request::Query { .. } => OPCODE_QUERY,
            Request::Finalize { .. } => OPCODE_FINALIZE,
            Request::ExecSql { .. } => OPCODE_EXEC_SQL,
            Request::QuerySql { .. } => OPCODE_QUERY_SQL,
            Request::Interrupt => OPCODE_INTERRUPT,
            Request::Unknown { opcode } => *opcode,
        }
    }

    /// True when the request travels on the control-plane slot.
    ///
    /// Heartbeat and interrupt are admitted independently of data-plane
    /// traffic so they remain deliverable while a query streams.
    pub fn is_control_plane(&self) -> bool {
        matches!(self, Request::Heartbeat { .. } | Request::Interrupt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_plane_routing() {
        assert!(Request::Heartbeat { timestamp: 0 }.is_control_plane());
        assert!(Request::Interrupt.is_control_plane());
        assert!(!Request::Leader.is_control_plane());
        assert!(
            !Request::Prepare { db_id: 0, sql: "SELECT 1".into() }.is_control_plane()
        );
        assert!(!Request::Unknown { opcode: 200 }.is_control_plane());
    }

    #[test]
    fn test_opcodes_are_stable() {
        assert_eq!(Request::Leader.opcode(), 0);
        assert_eq!(Request::Interrupt.opcode(), 10);
        assert_eq!(Request::Unknown { opcode: 42 }.opcode(), 42);
    }
}
