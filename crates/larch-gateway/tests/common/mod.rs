//! Shared helpers for gateway integration tests.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;

use larch_cluster::StaticCluster;
use larch_core::GatewayOptions;
use larch_core::Request;
use larch_core::Response;
use larch_gateway::Gateway;
use larch_gateway::ResponseSink;
use larch_gateway::SlotId;
use tempfile::TempDir;

/// A transport double that records every flushed response.
#[derive(Clone, Default)]
pub struct Wire {
    log: Arc<Mutex<Vec<(SlotId, Response)>>>,
}

impl Wire {
    /// Drain all recorded responses.
    pub fn drain(&self) -> Vec<(SlotId, Response)> {
        std::mem::take(&mut *self.log.lock().expect("wire log"))
    }

    /// Number of responses recorded and not yet drained.
    pub fn len(&self) -> usize {
        self.log.lock().expect("wire log").len()
    }
}

impl ResponseSink for Wire {
    fn flush(&mut self, slot: SlotId, response: &Response) {
        self.log.lock().expect("wire log").push((slot, response.clone()));
    }
}

/// Options rooted in a test directory, with a batch budget small enough
/// to exercise multi-batch streaming.
pub fn test_options(dir: &TempDir, batch_rows: u32) -> GatewayOptions {
    GatewayOptions {
        data_dir: dir.path().to_path_buf(),
        query_batch_rows: batch_rows,
        ..Default::default()
    }
}

/// Build a gateway over a recording wire.
pub fn test_gateway(
    dir: &TempDir,
    cluster: Arc<StaticCluster>,
    batch_rows: u32,
) -> (Gateway<Wire>, Wire) {
    let wire = Wire::default();
    let gateway = Gateway::new(cluster, test_options(dir, batch_rows), wire.clone());
    (gateway, wire)
}

/// Run one request through its full flush/flushed cycle and return the
/// response. Panics if the request is rejected or streams more batches.
pub fn roundtrip(gateway: &mut Gateway<Wire>, wire: &Wire, request: Request) -> Response {
    gateway.handle(request).expect("request accepted");
    let mut flushed = wire.drain();
    assert_eq!(flushed.len(), 1, "expected exactly one response");
    let (slot, response) = flushed.remove(0);
    gateway.flushed(slot);
    assert_eq!(wire.len(), 0, "roundtrip must not trigger a follow-up batch");
    response
}
