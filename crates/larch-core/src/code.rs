//! Engine result codes.
//!
//! Failure responses carry the SQL engine's integer result code verbatim,
//! so these constants are kept numerically identical to SQLite's. Clients
//! of the original wire protocol interpret them without translation.

/// Successful result.
pub const OK: i32 = 0;

/// Generic error.
pub const ERROR: i32 = 1;

/// A resource is busy; also used for a second OPEN on one connection.
pub const BUSY: i32 = 5;

/// Allocation failure; historically also covers a missing cluster leader.
pub const NOMEM: i32 = 7;

/// I/O error reported by the cluster layer.
pub const IOERR: i32 = 10;

/// Database or statement id does not exist.
pub const NOTFOUND: i32 = 12;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_match_engine_numbering() {
        // These values are part of the wire contract and must never drift.
        assert_eq!(OK, 0);
        assert_eq!(ERROR, 1);
        assert_eq!(BUSY, 5);
        assert_eq!(NOMEM, 7);
        assert_eq!(IOERR, 10);
        assert_eq!(NOTFOUND, 12);
    }
}
