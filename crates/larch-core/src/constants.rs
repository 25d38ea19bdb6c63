//! Fixed limits and defaults.
//!
//! All bounded behavior in the gateway derives from the constants below;
//! nothing grows without a limit named here.

/// Pre-allocated request contexts per gateway: slot 0 serves data-plane
/// requests, slot 1 serves control-plane requests.
pub const MAX_REQUESTS: usize = 2;

/// Default client heartbeat timeout in milliseconds, reported in the
/// WELCOME response.
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 15_000;

/// Default WAL size, in frames, past which a commit triggers the
/// distributed checkpoint admission check.
pub const DEFAULT_CHECKPOINT_THRESHOLD: u32 = 1_000;

/// Default database page size in bytes.
pub const DEFAULT_PAGE_SIZE: u32 = 4_096;

/// Smallest page size the engine accepts.
pub const MIN_PAGE_SIZE: u32 = 512;

/// Largest page size the engine accepts.
pub const MAX_PAGE_SIZE: u32 = 65_536;

/// Default number of rows in one streamed ROWS batch.
pub const DEFAULT_QUERY_BATCH_ROWS: u32 = 512;

/// Upper bound on the per-batch row budget.
pub const MAX_QUERY_BATCH_ROWS: u32 = 8_192;

/// Reader slots in the WAL index, matching the engine's WAL format.
pub const WAL_READER_SLOTS: usize = 5;
