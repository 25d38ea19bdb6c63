//! Per-connection request-dispatch gateway.
//!
//! A [`Gateway`] is the state machine between one remote client and the
//! local replicated database: it accepts decoded requests, coordinates
//! cluster prerequisites (leader discovery, peer listing, the log
//! barrier, distributed checkpoints), drives the SQL engine, and hands
//! rendered responses to the transport through the [`ResponseSink`] seam.
//!
//! # Concurrency model
//!
//! A gateway is single-threaded and cooperative: every handler runs to
//! completion on the transport's event loop, and the only suspension
//! point is the gap between `flush` and [`Gateway::flushed`]. Two
//! pre-allocated request slots keep control-plane traffic (heartbeat,
//! interrupt) deliverable while a data-plane query streams its batches.
//!
//! # Streaming
//!
//! A query that overflows one response batch leaves a suspended cursor in
//! its slot. Each [`Gateway::flushed`] call for that slot produces and
//! flushes the next batch, yielding a `Rows` sequence of zero or more
//! `Part` batches terminated by exactly one `Done` batch. The request
//! stays pinned in the slot for the whole sequence; an interrupt on the
//! control slot cancels it.

mod gateway;
mod sink;

// Re-export the protocol types for convenience
pub use larch_core::GatewayOptions;
pub use larch_core::Request;
pub use larch_core::Response;
pub use larch_core::RowsEof;

pub use gateway::Gateway;
pub use gateway::GatewayError;
pub use sink::ResponseSink;
pub use sink::SlotId;
