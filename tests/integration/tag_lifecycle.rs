//! Shared ownership through session tags

use super::support::{reconciler, synth_filter_document, synth_filter_graph};
use mapsession::graph::Graph;
use mapsession::persistence::{load, save, DocumentSource, LoadOptions, SaveOptions, Wait};
use mapsession::registry::SessionRegistry;
use std::sync::Arc;

fn tagged(tag: &str) -> LoadOptions {
    LoadOptions {
        tag: Some(tag.to_string()),
        ..LoadOptions::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_connection_lives_until_last_tag_is_unloaded() {
    let graph = synth_filter_graph();
    let reconciler = reconciler(&graph);
    let registry = SessionRegistry::new(Arc::clone(&reconciler));

    for tag in ["A", "B"] {
        load(&reconciler, DocumentSource::Value(synth_filter_document()), tagged(tag))
            .await
            .unwrap();
    }
    let maps = graph.maps(None);
    assert_eq!(maps.len(), 1);
    assert_eq!(maps[0].properties.tags, vec!["A", "B"]);

    let tags = registry.tags().await.unwrap();
    assert_eq!(tags.into_iter().collect::<Vec<_>>(), vec!["A", "B"]);

    registry.unload("A").await.unwrap();
    assert_eq!(graph.map_count(), 1);
    assert_eq!(graph.maps(None)[0].properties.tags, vec!["B"]);

    registry.unload("B").await.unwrap();
    assert_eq!(graph.map_count(), 0);
    assert!(registry.tags().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_save_stamps_tag_additively() {
    let graph = synth_filter_graph();
    let reconciler = reconciler(&graph);
    load(&reconciler, DocumentSource::Value(synth_filter_document()), tagged("A"))
        .await
        .unwrap();

    let options = SaveOptions {
        tag: Some("snapshot".to_string()),
        ..SaveOptions::default()
    };
    let saved = save(&reconciler, options).await.unwrap();
    assert_eq!(saved.maps[0].session_tags, vec!["A", "snapshot"]);
    assert_eq!(graph.maps(None)[0].properties.tags, vec!["A", "snapshot"]);
}

#[tokio::test(start_paused = true)]
async fn test_unload_stops_staged_specs_from_materializing() {
    let graph = Arc::new(mapsession::graph::MemoryGraph::new());
    let reconciler = reconciler(&graph);
    let registry = SessionRegistry::new(Arc::clone(&reconciler));
    assert!(reconciler.spawn_supervisor());

    let options = LoadOptions {
        tag: Some("pending".to_string()),
        wait: Wait::Forever,
        ..LoadOptions::default()
    };
    load(&reconciler, DocumentSource::Value(synth_filter_document()), options)
        .await
        .unwrap();
    assert_eq!(reconciler.staged_len(), 1);

    let report = registry.unload("pending").await.unwrap();
    assert_eq!(report.unstaged, 1);

    super::support::endpoint(&graph, "synth", "freq");
    super::support::endpoint(&graph, "filter", "cutoff");
    tokio::time::sleep(super::support::POLL * 3).await;
    assert_eq!(graph.map_count(), 0);

    reconciler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_clear_without_tag_removes_everything() {
    let graph = synth_filter_graph();
    let reconciler = reconciler(&graph);
    let registry = SessionRegistry::new(Arc::clone(&reconciler));
    load(&reconciler, DocumentSource::Value(synth_filter_document()), tagged("A"))
        .await
        .unwrap();

    let report = registry.clear(None).await.unwrap();
    assert_eq!(report.released, 1);
    assert_eq!(graph.map_count(), 0);
}
