//! Gateway configuration.

use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::constants::DEFAULT_CHECKPOINT_THRESHOLD;
use crate::constants::DEFAULT_HEARTBEAT_TIMEOUT_MS;
use crate::constants::DEFAULT_PAGE_SIZE;
use crate::constants::DEFAULT_QUERY_BATCH_ROWS;
use crate::constants::MAX_PAGE_SIZE;
use crate::constants::MAX_QUERY_BATCH_ROWS;
use crate::constants::MIN_PAGE_SIZE;

/// Configuration error reported by [`GatewayOptions::validate`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OptionsError {
    #[error("invalid page size {size}: must be a power of two between {min} and {max}")]
    InvalidPageSize { size: u32, min: u32, max: u32 },

    #[error("checkpoint threshold must be at least one WAL frame")]
    ZeroCheckpointThreshold,

    #[error("query batch budget {rows} out of range 1..={max}")]
    InvalidBatchRows { rows: u32, max: u32 },
}

/// Immutable gateway configuration, consumed read-only by every handler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayOptions {
    /// Heartbeat timeout, in milliseconds, reported to clients in WELCOME.
    pub heartbeat_timeout: u64,
    /// WAL size, in frames, past which a commit attempts a distributed
    /// checkpoint.
    pub checkpoint_threshold: u32,
    /// Database page size in bytes.
    pub page_size: u32,
    /// VFS name to open databases with; `None` selects the engine default.
    pub vfs: Option<String>,
    /// Name of the WAL replication plugin intercepting the write path.
    /// Recorded for the engine build that registers it; the gateway itself
    /// only threads it through.
    pub wal_replication: Option<String>,
    /// Row budget of one streamed ROWS batch.
    pub query_batch_rows: u32,
    /// Directory under which OPEN request names resolve to database files.
    pub data_dir: PathBuf,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT_MS,
            checkpoint_threshold: DEFAULT_CHECKPOINT_THRESHOLD,
            page_size: DEFAULT_PAGE_SIZE,
            vfs: None,
            wal_replication: None,
            query_batch_rows: DEFAULT_QUERY_BATCH_ROWS,
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl GatewayOptions {
    /// Check the options against the engine's fixed bounds.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if !self.page_size.is_power_of_two()
            || self.page_size < MIN_PAGE_SIZE
            || self.page_size > MAX_PAGE_SIZE
        {
            return Err(OptionsError::InvalidPageSize {
                size: self.page_size,
                min: MIN_PAGE_SIZE,
                max: MAX_PAGE_SIZE,
            });
        }

        if self.checkpoint_threshold == 0 {
            return Err(OptionsError::ZeroCheckpointThreshold);
        }

        if self.query_batch_rows == 0 || self.query_batch_rows > MAX_QUERY_BATCH_ROWS {
            return Err(OptionsError::InvalidBatchRows {
                rows: self.query_batch_rows,
                max: MAX_QUERY_BATCH_ROWS,
            });
        }

        Ok(())
    }

    /// Resolve a database name from an OPEN request to a filesystem path.
    pub fn database_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }
}
