//! Shared fixtures for integration tests

use mapsession::graph::{MemoryGraph, SignalId};
use mapsession::reconciler::{GraphHandle, Reconciler, ReconcilerConfig};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const POLL: Duration = Duration::from_millis(10);

/// A reconciler over a borrowed in-memory graph with a short poll interval.
pub fn reconciler(graph: &Arc<MemoryGraph>) -> Arc<Reconciler> {
    let config = ReconcilerConfig {
        poll_interval: POLL,
        ..ReconcilerConfig::default()
    };
    Arc::new(Reconciler::new(GraphHandle::Borrowed(graph.clone()), config))
}

/// Add `device/signal` to the graph, creating the device.
pub fn endpoint(graph: &MemoryGraph, device: &str, signal: &str) -> SignalId {
    let id = graph.add_device(device);
    graph.add_signal(id, signal).unwrap()
}

/// Graph exposing exactly `synth/freq` and `filter/cutoff`.
pub fn synth_filter_graph() -> Arc<MemoryGraph> {
    let graph = Arc::new(MemoryGraph::new());
    endpoint(&graph, "synth", "freq");
    endpoint(&graph, "filter", "cutoff");
    graph
}

/// The single-connection document used across tests.
pub fn synth_filter_document() -> Value {
    serde_json::json!({
        "fileversion": "2.4",
        "description": "synth into filter",
        "values": [],
        "views": [],
        "maps": [{
            "sources": ["synth/freq"],
            "destinations": ["filter/cutoff"],
            "expression": "y=x*2",
            "muted": false
        }]
    })
}

/// Write `document` as `<name>.json` in `dir`.
pub fn write_document(dir: &TempDir, name: &str, document: &Value) -> PathBuf {
    let path = dir.path().join(format!("{}.json", name));
    std::fs::write(&path, serde_json::to_string_pretty(document).unwrap()).unwrap();
    path
}
