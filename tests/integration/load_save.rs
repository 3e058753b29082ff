//! Load and save against a stable graph

use super::support::{endpoint, reconciler, synth_filter_document, synth_filter_graph, write_document};
use mapsession::document::Location;
use mapsession::graph::{Graph, MemoryGraph};
use mapsession::persistence::{
    load, parse_document, read_document, save, DocumentSource, LoadOptions, SaveOptions,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test(start_paused = true)]
async fn test_concrete_scenario_load_then_save() {
    let graph = synth_filter_graph();
    let reconciler = reconciler(&graph);
    let temp = TempDir::new().unwrap();
    let path = write_document(&temp, "demo", &synth_filter_document());

    load(&reconciler, DocumentSource::Path(path), LoadOptions::default())
        .await
        .unwrap();

    let maps = graph.maps(None);
    assert_eq!(maps.len(), 1);
    assert_eq!(maps[0].properties.expression, "y=x*2");
    assert!(!maps[0].properties.muted);

    let saved = save(&reconciler, SaveOptions::default()).await.unwrap();
    assert_eq!(saved.maps.len(), 1);
    let spec = &saved.maps[0];
    assert_eq!(spec.sources[0].as_str(), "synth/freq");
    assert_eq!(spec.destination.as_str(), "filter/cutoff");
    assert_eq!(spec.expression, "y=x*2");
    assert!(!spec.muted);
    assert_eq!(spec.session_tags, vec!["demo"]);
}

#[tokio::test(start_paused = true)]
async fn test_round_trip_is_identical_up_to_tags() {
    let graph = Arc::new(MemoryGraph::new());
    endpoint(&graph, "alpha", "out");
    endpoint(&graph, "beta", "out");
    endpoint(&graph, "synth", "freq");
    endpoint(&graph, "mixer", "in");
    endpoint(&graph, "filter", "cutoff");
    let reconciler = reconciler(&graph);

    let original = json!({
        "fileversion": "2.4",
        "description": "round trip",
        "maps": [
            {
                "sources": ["alpha/out", "beta/out"],
                "destinations": ["mixer/in"],
                "expression": "y=x$0+x$1",
                "muted": true,
                "process_loc": "DESTINATION",
                "protocol": "TCP",
                "use_inst": true,
                "version": 4,
                "custom_key": {"nested": 5}
            },
            {
                "sources": ["synth/freq"],
                "destinations": ["filter/cutoff"],
                "expression": "y=x*2",
                "scope": ["synth"]
            }
        ]
    });
    load(&reconciler, DocumentSource::Value(original.clone()), LoadOptions::default())
        .await
        .unwrap();

    let temp = TempDir::new().unwrap();
    let target = temp.path().join("saved.json");
    let saved = save(
        &reconciler,
        SaveOptions {
            target: Some(target.clone()),
            description: "round trip".to_string(),
            ..SaveOptions::default()
        },
    )
    .await
    .unwrap();

    let mut expected = parse_document(original).unwrap();
    for spec in expected.maps.iter_mut() {
        spec.add_tag("session");
    }
    assert_eq!(saved.maps, expected.maps);
    assert_eq!(saved.maps[0].process_location, Location::Destination);
    assert_eq!(saved.maps[0].extra["custom_key"], json!({"nested": 5}));

    let reread = parse_document(read_document(&target).unwrap()).unwrap();
    assert_eq!(reread, saved);
}

#[tokio::test(start_paused = true)]
async fn test_loading_twice_does_not_duplicate_connections() {
    let graph = synth_filter_graph();
    let reconciler = reconciler(&graph);
    for _ in 0..2 {
        load(
            &reconciler,
            DocumentSource::Value(synth_filter_document()),
            LoadOptions::default(),
        )
        .await
        .unwrap();
    }
    let maps = graph.maps(None);
    assert_eq!(maps.len(), 1);
    assert_eq!(maps[0].properties.tags, vec!["session"]);
}

#[tokio::test(start_paused = true)]
async fn test_wildcard_source_skips_hidden_devices() {
    let graph = Arc::new(MemoryGraph::new());
    endpoint(&graph, "synth.1", "volume");
    endpoint(&graph, "synth.2", "volume");
    let monitor = graph.add_hidden_device("monitor");
    graph.add_signal(monitor, "volume").unwrap();
    endpoint(&graph, "mixer", "master");
    let reconciler = reconciler(&graph);

    let document = json!({
        "fileversion": "2.4",
        "maps": [{
            "sources": ["*/volume"],
            "destinations": ["mixer/master"],
            "expression": "y=x"
        }]
    });
    load(&reconciler, DocumentSource::Value(document), LoadOptions::default())
        .await
        .unwrap();

    let maps = graph.maps(None);
    assert_eq!(maps.len(), 2);
    let mut sources: Vec<String> = maps.iter().map(|m| m.sources[0].device_name.clone()).collect();
    sources.sort();
    assert_eq!(sources, vec!["synth.1", "synth.2"]);
    assert!(maps.iter().all(|m| !m.touches_hidden()));
}

#[tokio::test(start_paused = true)]
async fn test_device_overrides_pick_one_instance() {
    let graph = Arc::new(MemoryGraph::new());
    endpoint(&graph, "synth.1", "freq");
    endpoint(&graph, "synth.2", "freq");
    endpoint(&graph, "filter", "cutoff");
    let reconciler = reconciler(&graph);

    let options = LoadOptions {
        overrides: Some([("synth".to_string(), "synth.2".to_string())].into_iter().collect()),
        ..LoadOptions::default()
    };
    load(&reconciler, DocumentSource::Value(synth_filter_document()), options)
        .await
        .unwrap();

    let maps = graph.maps(None);
    assert_eq!(maps.len(), 1);
    assert_eq!(maps[0].sources[0].device_name, "synth.2");
}

#[tokio::test(start_paused = true)]
async fn test_missing_file_is_an_io_error() {
    let graph = synth_filter_graph();
    let reconciler = reconciler(&graph);
    let temp = TempDir::new().unwrap();
    let result = load(
        &reconciler,
        DocumentSource::Path(temp.path().join("absent.json")),
        LoadOptions::default(),
    )
    .await;
    assert!(matches!(result, Err(mapsession::error::SessionError::Io { .. })));
}
