//! The response seam between gateway and transport.

use larch_core::Request;
use larch_core::Response;

/// Identifies one of the gateway's two request slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotId {
    /// Slot 0: open, prepare, exec, query, finalize, exec-sql, query-sql,
    /// leader, client.
    Data,
    /// Slot 1: heartbeat and interrupt, admitted independently so they
    /// stay deliverable while slot 0 streams.
    Control,
}

impl SlotId {
    /// The slot a request is admitted on.
    pub fn for_request(request: &Request) -> SlotId {
        if request.is_control_plane() { SlotId::Control } else { SlotId::Data }
    }

    /// Index into the gateway's slot array.
    pub(crate) fn index(self) -> usize {
        match self {
            SlotId::Data => 0,
            SlotId::Control => 1,
        }
    }
}

/// Where the gateway hands rendered responses to the transport.
///
/// The gateway calls [`flush`](ResponseSink::flush) exactly once per
/// accepted request, or once per batch of a streaming query. The response
/// reference stays valid until the transport reports completion through
/// `Gateway::flushed` for the same slot; until then the slot accepts no
/// new request. The transport serializes responses onto the wire in
/// whatever order it chooses across slots; within a slot, order follows
/// the flush order.
pub trait ResponseSink {
    /// A response for `slot` is ready to be written to the wire.
    fn flush(&mut self, slot: SlotId, response: &Response);
}

impl<F> ResponseSink for F
where
    F: FnMut(SlotId, &Response),
{
    fn flush(&mut self, slot: SlotId, response: &Response) {
        self(slot, response)
    }
}
