//! Loading documents written in older file versions

use super::support::{endpoint, reconciler, synth_filter_graph, write_document};
use mapsession::error::{DocumentError, SessionError};
use mapsession::graph::{Graph, MemoryGraph};
use mapsession::persistence::{load, DocumentSource, LoadOptions};
use mapsession::upgrade::upgrade;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_upgrade_is_deterministic() {
    let legacy = json!({
        "fileversion": "2.0",
        "mapping": {"connections": [{
            "source": "synth/freq",
            "destination": "filter/cutoff",
            "mute": 0,
            "expression": "dst=src*3"
        }]}
    });
    let first = serde_json::to_string(&upgrade(legacy.clone()).unwrap()).unwrap();
    let second = serde_json::to_string(&upgrade(legacy).unwrap()).unwrap();
    assert_eq!(first, second);
}

#[tokio::test(start_paused = true)]
async fn test_grouped_2_1_document_with_modes() {
    let graph = Arc::new(MemoryGraph::new());
    endpoint(&graph, "synth", "freq");
    endpoint(&graph, "filter", "cutoff");
    endpoint(&graph, "lfo", "rate");
    let reconciler = reconciler(&graph);
    let temp = TempDir::new().unwrap();
    let path = write_document(
        &temp,
        "old",
        &json!({
            "fileversion": "2.1",
            "mapping": {"connections": [
                {"source": ["synth/freq"], "destination": ["filter/cutoff"], "mode": "reverse", "mute": 1},
                {"source": ["lfo/rate"], "destination": ["filter/cutoff"], "mode": "linear"}
            ]}
        }),
    );

    load(&reconciler, DocumentSource::Path(path), LoadOptions::default())
        .await
        .unwrap();

    let maps = graph.maps(Some("old"));
    assert_eq!(maps.len(), 2);
    let reversed = maps
        .iter()
        .find(|m| m.destination.device_name == "synth")
        .expect("reverse mode swaps the endpoints");
    assert_eq!(reversed.sources[0].device_name, "filter");
    assert_eq!(reversed.properties.expression, "y=x");
    assert!(reversed.properties.muted);

    let linear = maps
        .iter()
        .find(|m| m.sources[0].device_name == "lfo")
        .unwrap();
    assert_eq!(linear.properties.expression, "y=linear(x,-,-,-,-)");
    assert!(!linear.properties.muted);
}

#[tokio::test(start_paused = true)]
async fn test_2_2_document_rewrites_expression_tokens() {
    let graph = Arc::new(MemoryGraph::new());
    endpoint(&graph, "a", "out");
    endpoint(&graph, "b", "out");
    endpoint(&graph, "mix", "in");
    let reconciler = reconciler(&graph);

    let document = json!({
        "fileversion": "2.2",
        "maps": [{
            "src": ["a/out", "b/out"],
            "dest": "mix/in",
            "expression": "dst=src[0]+s[1]"
        }]
    });
    load(&reconciler, DocumentSource::Value(document), LoadOptions::default())
        .await
        .unwrap();

    let maps = graph.maps(None);
    assert_eq!(maps.len(), 1);
    assert_eq!(maps[0].properties.expression, "y=x$0+x$1");
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_version_leaves_graph_untouched() {
    let graph = synth_filter_graph();
    let reconciler = reconciler(&graph);
    let document = json!({
        "fileversion": "1.5",
        "maps": [{"sources": ["synth/freq"], "destinations": ["filter/cutoff"]}]
    });

    let result = load(&reconciler, DocumentSource::Value(document), LoadOptions::default()).await;
    assert!(matches!(
        result,
        Err(SessionError::Document(DocumentError::UnsupportedVersion { .. }))
    ));
    assert_eq!(graph.map_count(), 0);
    assert_eq!(reconciler.staged_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_schema_violation_is_reported() {
    let graph = synth_filter_graph();
    let reconciler = reconciler(&graph);
    let document = json!({
        "fileversion": "2.4",
        "maps": [{"sources": ["no-signal-part"], "destinations": ["filter/cutoff"]}]
    });

    let result = load(&reconciler, DocumentSource::Value(document), LoadOptions::default()).await;
    assert!(matches!(
        result,
        Err(SessionError::Document(DocumentError::SchemaInvalid(_)))
    ));
    assert_eq!(graph.map_count(), 0);
}
