//! Requests delivered to the management device

use super::support::{reconciler, synth_filter_document, synth_filter_graph, write_document, POLL};
use mapsession::graph::Graph;
use mapsession::interactive::InteractiveSession;
use mapsession::reconciler::ReconcileEvent;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test(start_paused = true)]
async fn test_load_and_unload_requests() {
    let graph = synth_filter_graph();
    let reconciler = reconciler(&graph);
    let session = InteractiveSession::register(Arc::clone(&reconciler)).unwrap();
    let temp = TempDir::new().unwrap();
    let path = write_document(&temp, "live", &synth_filter_document());

    graph.push_update(session.load_input(), path.to_str().unwrap());
    assert_eq!(session.handle_pending().await, 1);
    assert!(reconciler.supervisor_running());

    tokio::time::sleep(POLL * 3).await;
    let maps = graph.maps(Some("live"));
    assert_eq!(maps.len(), 1);
    assert_eq!(maps[0].properties.expression, "y=x*2");

    graph.push_update(session.unload_input(), path.to_str().unwrap());
    assert_eq!(session.handle_pending().await, 1);
    assert_eq!(graph.map_count(), 0);
    assert_eq!(reconciler.staged_len(), 0);

    tokio::time::sleep(POLL * 3).await;
    assert_eq!(graph.map_count(), 0, "unloaded session is not re-created");

    reconciler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_bad_request_does_not_stop_the_loop() {
    let graph = synth_filter_graph();
    let reconciler = reconciler(&graph);
    let mut events = reconciler.subscribe();
    let session = Arc::new(InteractiveSession::register(Arc::clone(&reconciler)).unwrap());
    let temp = TempDir::new().unwrap();

    let runner = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.run().await })
    };

    graph.push_update(session.load_input(), "/nonexistent/session.json");
    tokio::time::sleep(POLL * 3).await;
    let event = events.recv().await.unwrap();
    assert!(matches!(event, ReconcileEvent::HandlerFailed { ref handler, .. } if handler == "load"));

    let path = write_document(&temp, "after", &synth_filter_document());
    graph.push_update(session.load_input(), path.to_str().unwrap());
    tokio::time::sleep(POLL * 5).await;
    assert_eq!(graph.maps(Some("after")).len(), 1);

    reconciler.shutdown_flag().request();
    runner.await.unwrap().unwrap();
    assert!(!reconciler.supervisor_running());
}

#[tokio::test(start_paused = true)]
async fn test_saved_session_excludes_management_device() {
    let graph = synth_filter_graph();
    let reconciler = reconciler(&graph);
    let session = InteractiveSession::register(Arc::clone(&reconciler)).unwrap();
    let temp = TempDir::new().unwrap();
    let path = write_document(&temp, "live", &synth_filter_document());

    graph.push_update(session.load_input(), path.to_str().unwrap());
    session.handle_pending().await;
    tokio::time::sleep(POLL * 3).await;

    let saved = mapsession::persistence::save(&reconciler, Default::default())
        .await
        .unwrap();
    assert_eq!(saved.maps.len(), 1);
    assert!(graph
        .devices()
        .iter()
        .any(|d| d.id == session.device() && d.hidden));

    reconciler.shutdown().await;
}
