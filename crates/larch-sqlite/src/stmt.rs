//! Prepared statements over the raw engine handle.
//!
//! Statements are held by the database's registry and must outlive any
//! borrow of the connection while a streaming query is suspended in a
//! gateway slot, which rules out the binding's lifetime-checked statement
//! type. The raw handle is confined to the connection that produced it and
//! is never shared across threads.

use std::ffi::CStr;
use std::ffi::CString;
use std::ffi::c_char;
use std::ffi::c_int;
use std::ptr;

use larch_core::RowsEof;
use larch_core::SqlValue;
use rusqlite::ffi;

use crate::error::SqliteError;

/// Outcome of running a statement to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecResult {
    /// Rowid of the most recent successful insert on the connection.
    pub last_insert_id: u64,
    /// Rows changed by the statement.
    pub rows_affected: u64,
}

/// One batch of rows produced by a streaming query.
#[derive(Debug, Clone, PartialEq)]
pub struct RowBatch {
    /// Result column names in statement order.
    pub columns: Vec<String>,
    /// Row tuples in engine order.
    pub rows: Vec<Vec<SqlValue>>,
    /// Whether more batches follow.
    pub eof: RowsEof,
}

/// A compiled SQL statement owned by a database's registry.
pub struct Statement {
    id: u32,
    raw: *mut ffi::sqlite3_stmt,
    db: *mut ffi::sqlite3,
    tail: Option<String>,
    pending: Option<Vec<SqlValue>>,
}

// The raw handles are confined to the connection that created them; a
// Statement only moves between threads together with its ReplicatedDb.
unsafe impl Send for Statement {}

impl Statement {
    /// Compile the first statement of `sql` against the given connection
    /// handle. The compiled handle is null when the text holds no
    /// executable statement (whitespace or comments only).
    pub(crate) fn prepare(
        db: *mut ffi::sqlite3,
        id: u32,
        sql: &str,
    ) -> Result<Self, SqliteError> {
        let c_sql = CString::new(sql).map_err(|_| SqliteError::NulInSql)?;
        let mut raw: *mut ffi::sqlite3_stmt = ptr::null_mut();
        let mut tail: *const c_char = ptr::null();

        let rc = unsafe {
            ffi::sqlite3_prepare_v2(db, c_sql.as_ptr(), -1, &mut raw, &mut tail)
        };
        if rc != ffi::SQLITE_OK {
            return Err(SqliteError::Prepare { code: rc, message: errmsg(db) });
        }

        let tail = if tail.is_null() {
            None
        } else {
            // The tail points into the buffer we handed to the engine, so
            // its offset indexes the original text directly.
            let offset = unsafe { tail.offset_from(c_sql.as_ptr()) } as usize;
            let rest = &sql[offset..];
            if rest.is_empty() { None } else { Some(rest.to_string()) }
        };

        Ok(Self { id, raw, db, tail, pending: None })
    }

    /// Statement id, unique within the owning database.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// True when the SQL compiled to no executable statement.
    pub fn is_empty(&self) -> bool {
        self.raw.is_null()
    }

    /// Residual SQL text after this statement, for multi-statement input.
    pub fn tail(&self) -> Option<&str> {
        self.tail.as_deref()
    }

    /// Number of bind placeholders in the compiled form.
    pub fn param_count(&self) -> u64 {
        if self.raw.is_null() {
            return 0;
        }
        unsafe { ffi::sqlite3_bind_parameter_count(self.raw) as u64 }
    }

    /// Bind the given values to the statement's parameters, in order.
    ///
    /// Resets the statement first so a previously executed statement can
    /// run again; any lookahead row from an earlier stream is discarded.
    pub fn bind(&mut self, params: &[SqlValue]) -> Result<(), SqliteError> {
        if self.raw.is_null() {
            return Err(SqliteError::EmptyStatement);
        }

        self.pending = None;
        unsafe {
            ffi::sqlite3_reset(self.raw);
            ffi::sqlite3_clear_bindings(self.raw);
        }

        for (i, value) in params.iter().enumerate() {
            let index = (i + 1) as c_int;
            let rc = unsafe {
                match value {
                    SqlValue::Null => ffi::sqlite3_bind_null(self.raw, index),
                    SqlValue::Integer(v) => ffi::sqlite3_bind_int64(self.raw, index, *v),
                    SqlValue::Real(v) => ffi::sqlite3_bind_double(self.raw, index, *v),
                    SqlValue::Text(v) => ffi::sqlite3_bind_text(
                        self.raw,
                        index,
                        v.as_ptr() as *const c_char,
                        v.len() as c_int,
                        ffi::SQLITE_TRANSIENT(),
                    ),
                    SqlValue::Blob(v) => ffi::sqlite3_bind_blob(
                        self.raw,
                        index,
                        v.as_ptr() as *const std::ffi::c_void,
                        v.len() as c_int,
                        ffi::SQLITE_TRANSIENT(),
                    ),
                }
            };
            if rc != ffi::SQLITE_OK {
                return Err(SqliteError::Bind { code: rc, message: errmsg(self.db) });
            }
        }

        Ok(())
    }

    /// Run the statement to completion.
    ///
    /// Statements that return rows are drained; the result reports the
    /// connection's last insert rowid and change count.
    pub fn exec(&mut self) -> Result<ExecResult, SqliteError> {
        if self.raw.is_null() {
            return Err(SqliteError::EmptyStatement);
        }

        loop {
            let rc = unsafe { ffi::sqlite3_step(self.raw) };
            match rc {
                ffi::SQLITE_ROW => continue,
                ffi::SQLITE_DONE => break,
                _ => {
                    let message = errmsg(self.db);
                    unsafe { ffi::sqlite3_reset(self.raw) };
                    return Err(SqliteError::Exec { code: rc, message });
                }
            }
        }

        let result = ExecResult {
            last_insert_id: unsafe { ffi::sqlite3_last_insert_rowid(self.db) } as u64,
            rows_affected: unsafe { ffi::sqlite3_changes(self.db) } as u64,
        };
        unsafe { ffi::sqlite3_reset(self.raw) };
        Ok(result)
    }

    /// Produce the next batch of at most `budget` rows.
    ///
    /// The PART/DONE decision uses a single row of lookahead: when the
    /// batch fills exactly at the end of the result set, the batch is
    /// reported terminal instead of forcing an empty follow-up. The
    /// lookahead row is carried into the next batch.
    pub fn query_batch(&mut self, budget: usize) -> Result<RowBatch, SqliteError> {
        if self.raw.is_null() {
            return Err(SqliteError::EmptyStatement);
        }

        let columns = self.column_names();
        let mut rows: Vec<Vec<SqlValue>> = Vec::new();

        if let Some(row) = self.pending.take() {
            rows.push(row);
        }

        loop {
            if rows.len() >= budget.max(1) {
                // Batch is full; look one row ahead to pick the marker.
                return match self.step()? {
                    Some(row) => {
                        self.pending = Some(row);
                        Ok(RowBatch { columns, rows, eof: RowsEof::Part })
                    }
                    None => Ok(RowBatch { columns, rows, eof: RowsEof::Done }),
                };
            }

            match self.step()? {
                Some(row) => rows.push(row),
                None => return Ok(RowBatch { columns, rows, eof: RowsEof::Done }),
            }
        }
    }

    /// Reset the statement and drop any suspended stream state.
    pub fn reset(&mut self) {
        self.pending = None;
        if !self.raw.is_null() {
            unsafe { ffi::sqlite3_reset(self.raw) };
        }
    }

    /// Destroy the statement, reporting the error of its last evaluation.
    pub(crate) fn finalize(mut self) -> Result<(), SqliteError> {
        let raw = self.raw;
        self.raw = ptr::null_mut();
        let rc = unsafe { ffi::sqlite3_finalize(raw) };
        if rc != ffi::SQLITE_OK {
            return Err(SqliteError::Finalize { code: rc, message: errmsg(self.db) });
        }
        Ok(())
    }

    /// Step once; `Some(row)` on a row, `None` at end of the result set.
    fn step(&mut self) -> Result<Option<Vec<SqlValue>>, SqliteError> {
        let rc = unsafe { ffi::sqlite3_step(self.raw) };
        match rc {
            ffi::SQLITE_ROW => Ok(Some(self.read_row())),
            ffi::SQLITE_DONE => {
                // Release read locks promptly so the statement can be
                // re-queried and checkpoints are not held back.
                unsafe { ffi::sqlite3_reset(self.raw) };
                Ok(None)
            }
            _ => {
                let message = errmsg(self.db);
                unsafe { ffi::sqlite3_reset(self.raw) };
                self.pending = None;
                Err(SqliteError::Query { code: rc, message })
            }
        }
    }

    /// Read the current row into owned values.
    fn read_row(&self) -> Vec<SqlValue> {
        let count = unsafe { ffi::sqlite3_column_count(self.raw) };
        (0..count).map(|i| self.read_column(i)).collect()
    }

    fn read_column(&self, i: c_int) -> SqlValue {
        unsafe {
            match ffi::sqlite3_column_type(self.raw, i) {
                ffi::SQLITE_INTEGER => SqlValue::Integer(ffi::sqlite3_column_int64(self.raw, i)),
                ffi::SQLITE_FLOAT => SqlValue::Real(ffi::sqlite3_column_double(self.raw, i)),
                ffi::SQLITE_TEXT => {
                    let len = ffi::sqlite3_column_bytes(self.raw, i) as usize;
                    let ptr = ffi::sqlite3_column_text(self.raw, i);
                    let bytes = if ptr.is_null() {
                        &[][..]
                    } else {
                        std::slice::from_raw_parts(ptr, len)
                    };
                    SqlValue::Text(String::from_utf8_lossy(bytes).into_owned())
                }
                ffi::SQLITE_BLOB => {
                    let len = ffi::sqlite3_column_bytes(self.raw, i) as usize;
                    let ptr = ffi::sqlite3_column_blob(self.raw, i);
                    let bytes = if ptr.is_null() {
                        Vec::new()
                    } else {
                        std::slice::from_raw_parts(ptr as *const u8, len).to_vec()
                    };
                    SqlValue::Blob(bytes)
                }
                _ => SqlValue::Null,
            }
        }
    }

    fn column_names(&self) -> Vec<String> {
        let count = unsafe { ffi::sqlite3_column_count(self.raw) };
        (0..count)
            .map(|i| {
                let ptr = unsafe { ffi::sqlite3_column_name(self.raw, i) };
                if ptr.is_null() {
                    String::new()
                } else {
                    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
                }
            })
            .collect()
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            unsafe { ffi::sqlite3_finalize(self.raw) };
            self.raw = ptr::null_mut();
        }
    }
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("id", &self.id)
            .field("empty", &self.is_empty())
            .field("tail", &self.tail)
            .finish()
    }
}

/// The connection's current error message.
pub(crate) fn errmsg(db: *mut ffi::sqlite3) -> String {
    let ptr = unsafe { ffi::sqlite3_errmsg(db) };
    if ptr.is_null() {
        return String::from("unknown error");
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}
