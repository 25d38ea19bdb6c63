//! Error types for the engine layer.

use std::path::PathBuf;

use larch_core::code;
use snafu::Snafu;

/// Errors from the local SQL engine.
///
/// Variants produced while a statement is live carry the engine's integer
/// result code and its error message verbatim; the gateway forwards both
/// to the client unchanged.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SqliteError {
    /// Failed to open the database file.
    #[snafu(display("failed to open database {}: {source}", path.display()))]
    Open {
        /// Path that failed to open.
        path: PathBuf,
        /// The underlying engine error.
        source: rusqlite::Error,
    },

    /// Failed to create the data directory for a database.
    #[snafu(display("failed to create directory {}: {source}", path.display()))]
    CreateDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A connection pragma failed during setup.
    #[snafu(display("failed to configure connection: {source}"))]
    Configure {
        /// The underlying engine error.
        source: rusqlite::Error,
    },

    /// Statement compilation failed.
    #[snafu(display("{message}"))]
    Prepare {
        /// Engine result code.
        code: i32,
        /// Engine error text.
        message: String,
    },

    /// Parameter binding failed.
    #[snafu(display("{message}"))]
    Bind {
        /// Engine result code.
        code: i32,
        /// Engine error text.
        message: String,
    },

    /// Statement execution failed.
    #[snafu(display("{message}"))]
    Exec {
        /// Engine result code.
        code: i32,
        /// Engine error text.
        message: String,
    },

    /// Row stepping failed while streaming a query.
    #[snafu(display("{message}"))]
    Query {
        /// Engine result code.
        code: i32,
        /// Engine error text.
        message: String,
    },

    /// Destroying a statement reported the error of its last evaluation.
    #[snafu(display("{message}"))]
    Finalize {
        /// Engine result code.
        code: i32,
        /// Engine error text.
        message: String,
    },

    /// SQL text compiled to no executable statement but one was required.
    #[snafu(display("empty statement"))]
    EmptyStatement,

    /// No statement is registered under the given id.
    #[snafu(display("no stmt with id {id}"))]
    NoSuchStatement {
        /// The unknown statement id.
        id: u32,
    },

    /// SQL text contains an interior nul byte and cannot reach the engine.
    #[snafu(display("sql text contains a nul byte"))]
    NulInSql,
}

impl SqliteError {
    /// The engine result code reported to clients.
    pub fn code(&self) -> i32 {
        match self {
            SqliteError::Open { source, .. } | SqliteError::Configure { source } => {
                engine_code(source)
            }
            SqliteError::CreateDirectory { .. } => code::IOERR,
            SqliteError::Prepare { code, .. }
            | SqliteError::Bind { code, .. }
            | SqliteError::Exec { code, .. }
            | SqliteError::Query { code, .. }
            | SqliteError::Finalize { code, .. } => *code,
            SqliteError::EmptyStatement | SqliteError::NulInSql => code::ERROR,
            SqliteError::NoSuchStatement { .. } => code::NOTFOUND,
        }
    }
}

/// Extract the engine result code from a rusqlite error.
fn engine_code(err: &rusqlite::Error) -> i32 {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => e.extended_code,
        _ => code::ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_errors_carry_engine_code() {
        let err = SqliteError::Prepare { code: 1, message: "near \"FROB\": syntax error".into() };
        assert_eq!(err.code(), 1);
        assert_eq!(err.to_string(), "near \"FROB\": syntax error");
    }

    #[test]
    fn test_empty_statement_maps_to_generic_error() {
        assert_eq!(SqliteError::EmptyStatement.code(), code::ERROR);
    }
}
