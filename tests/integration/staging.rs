//! Staged and supervised loads under paused time

use super::support::{endpoint, reconciler, synth_filter_document, POLL};
use mapsession::graph::{Graph, MemoryGraph};
use mapsession::persistence::{load, DocumentSource, LoadOptions, Wait};
use mapsession::reconciler::{EntryState, ReconcileEvent};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_waiting_load_converges_once_endpoints_appear() {
    let graph = Arc::new(MemoryGraph::new());
    let reconciler = reconciler(&graph);

    let task = {
        let reconciler = Arc::clone(&reconciler);
        tokio::spawn(async move {
            let options = LoadOptions {
                wait: Wait::Forever,
                ..LoadOptions::default()
            };
            load(&reconciler, DocumentSource::Value(synth_filter_document()), options).await
        })
    };

    tokio::time::sleep(POLL * 5).await;
    assert_eq!(graph.map_count(), 0);
    assert_eq!(reconciler.staged_len(), 1);

    endpoint(&graph, "synth", "freq");
    endpoint(&graph, "filter", "cutoff");

    tokio::time::timeout(POLL * 5, task)
        .await
        .expect("load settles within a few polls")
        .unwrap()
        .unwrap();
    assert_eq!(graph.map_count(), 1);
    assert_eq!(reconciler.staged_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_purges_spec_that_never_resolves() {
    let graph = Arc::new(MemoryGraph::new());
    let reconciler = reconciler(&graph);
    let mut events = reconciler.subscribe();

    let options = LoadOptions {
        wait: Wait::For(Duration::from_millis(50)),
        ..LoadOptions::default()
    };
    load(&reconciler, DocumentSource::Value(synth_filter_document()), options)
        .await
        .unwrap();
    assert_eq!(reconciler.staged_len(), 0);

    let mut expired = false;
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, ReconcileEvent::Materialized { .. }));
        expired |= matches!(event, ReconcileEvent::Expired { .. });
    }
    assert!(expired);

    endpoint(&graph, "synth", "freq");
    endpoint(&graph, "filter", "cutoff");
    reconciler.step();
    assert_eq!(graph.map_count(), 0, "purged specs never materialize");
}

#[tokio::test(start_paused = true)]
async fn test_persistent_load_recreates_vanished_connection() {
    let graph = Arc::new(MemoryGraph::new());
    let synth = graph.add_device("synth");
    graph.add_signal(synth, "freq").unwrap();
    endpoint(&graph, "filter", "cutoff");
    let reconciler = reconciler(&graph);

    let options = LoadOptions {
        persist: true,
        ..LoadOptions::default()
    };
    load(&reconciler, DocumentSource::Value(synth_filter_document()), options)
        .await
        .unwrap();
    assert!(reconciler.supervisor_running());

    tokio::time::sleep(POLL * 3).await;
    assert_eq!(graph.map_count(), 1);
    assert_eq!(reconciler.count_in(EntryState::Materialized), 1);

    graph.remove_device(synth).unwrap();
    tokio::time::sleep(POLL * 3).await;
    assert_eq!(graph.map_count(), 0);
    assert_eq!(reconciler.count_in(EntryState::Staged), 1);

    let synth = graph.add_device("synth");
    graph.add_signal(synth, "freq").unwrap();
    tokio::time::sleep(POLL * 3).await;
    assert_eq!(graph.map_count(), 1);
    let live = graph.maps(Some("session"));
    assert_eq!(live[0].properties.expression, "y=x*2");

    reconciler.shutdown().await;
    assert!(!reconciler.supervisor_running());
}

#[tokio::test(start_paused = true)]
async fn test_waiting_load_returns_immediately_when_supervised() {
    let graph = Arc::new(MemoryGraph::new());
    let reconciler = reconciler(&graph);
    assert!(reconciler.spawn_supervisor());

    let options = LoadOptions {
        wait: Wait::Forever,
        ..LoadOptions::default()
    };
    load(&reconciler, DocumentSource::Value(synth_filter_document()), options)
        .await
        .unwrap();
    assert_eq!(reconciler.staged_len(), 1, "left to the supervisor");

    endpoint(&graph, "synth", "freq");
    endpoint(&graph, "filter", "cutoff");
    tokio::time::sleep(POLL * 3).await;
    assert_eq!(graph.map_count(), 1);
    assert_eq!(reconciler.staged_len(), 0);

    reconciler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_repeated_persistent_load_keeps_one_queue_entry() {
    let graph = super::support::synth_filter_graph();
    let reconciler = reconciler(&graph);
    let options = || LoadOptions {
        persist: true,
        ..LoadOptions::default()
    };

    load(&reconciler, DocumentSource::Value(synth_filter_document()), options())
        .await
        .unwrap();
    tokio::time::sleep(POLL * 3).await;
    assert_eq!(reconciler.staged_len(), 1);

    for _ in 0..3 {
        load(&reconciler, DocumentSource::Value(synth_filter_document()), options())
            .await
            .unwrap();
    }
    tokio::time::sleep(POLL * 3).await;
    assert_eq!(reconciler.staged_len(), 1);
    assert_eq!(graph.map_count(), 1);

    reconciler.shutdown().await;
}
