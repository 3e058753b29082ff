//! Connection Reconciler
//!
//! Keeps declared connection specs converged against the live graph. Specs
//! are either materialized once or queued for supervision: staged specs are
//! retried on every poll until their endpoints appear, persistent specs are
//! re-staged whenever their live connections vanish, and staged specs past
//! their deadline are purged.

use crate::document::ConnectionSpec;
use crate::error::SessionError;
use crate::graph::{Graph, MapId};
use crate::resolver::DeviceOverrides;
use crate::shutdown::ShutdownFlag;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub mod materialize;
pub mod staging;

pub use materialize::{materialize, Materialization};
pub use staging::{EntryState, StagedEntry, StagingQueue};

/// The shared graph, either borrowed from the caller or owned by the reconciler.
///
/// Only owned graphs are freed on shutdown.
#[derive(Clone)]
pub enum GraphHandle {
    Borrowed(Arc<dyn Graph>),
    Owned(Arc<dyn Graph>),
}

impl GraphHandle {
    pub fn graph(&self) -> &Arc<dyn Graph> {
        match self {
            GraphHandle::Borrowed(graph) | GraphHandle::Owned(graph) => graph,
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, GraphHandle::Owned(_))
    }
}

/// Reconciler tuning.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Interval of each graph poll in the supervision loop.
    pub poll_interval: Duration,
    /// Passes a resolvable spec may fail creation before it is abandoned.
    pub max_create_attempts: u32,
    /// Name of this process's own management device.
    pub management_device: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            max_create_attempts: 3,
            management_device: "mapsession".to_string(),
        }
    }
}

/// Outcome notifications published by the reconciler.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileEvent {
    Materialized { spec: String, maps: Vec<MapId> },
    Restaged { spec: String },
    Expired { spec: String },
    CreateFailed { connection: String, error: String },
    Abandoned { spec: String, attempts: u32 },
    HandlerFailed { handler: String, error: String },
}

/// Counts from one supervision pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepReport {
    pub materialized: usize,
    pub restaged: usize,
    pub expired: usize,
    pub abandoned: usize,
    pub pending: usize,
}

/// Reconciliation engine over one shared graph.
pub struct Reconciler {
    graph: GraphHandle,
    config: ReconcilerConfig,
    queue: Arc<Mutex<StagingQueue>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    shutdown: ShutdownFlag,
    events: broadcast::Sender<ReconcileEvent>,
}

impl Reconciler {
    pub fn new(graph: GraphHandle, config: ReconcilerConfig) -> Self {
        Self::with_shutdown(graph, config, ShutdownFlag::new())
    }

    /// Use an existing stop flag, e.g. one wired to termination signals.
    pub fn with_shutdown(graph: GraphHandle, config: ReconcilerConfig, shutdown: ShutdownFlag) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            graph,
            config,
            queue: Arc::new(Mutex::new(StagingQueue::new())),
            supervisor: Mutex::new(None),
            shutdown,
            events,
        }
    }

    pub fn graph(&self) -> &Arc<dyn Graph> {
        self.graph.graph()
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn shutdown_flag(&self) -> &ShutdownFlag {
        &self.shutdown
    }

    /// Receive outcome events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ReconcileEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: ReconcileEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Number of specs currently queued (staged or supervised).
    pub fn staged_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Number of queued specs in `state`.
    pub fn count_in(&self, state: EntryState) -> usize {
        self.queue.lock().count_in(state)
    }

    /// Poll the graph once for the configured interval.
    pub async fn poll(&self) -> Result<(), SessionError> {
        self.graph().poll(self.config.poll_interval).await?;
        Ok(())
    }

    /// Queue specs for supervision.
    pub fn enqueue(&self, specs: Vec<ConnectionSpec>, overrides: Option<Arc<DeviceOverrides>>) {
        let mut queue = self.queue.lock();
        for spec in specs {
            let label = spec.label();
            if queue.push(StagedEntry::new(spec, overrides.clone())) {
                debug!(spec = %label, "Merged into queued connection");
            } else {
                debug!(spec = %label, "Staged connection");
            }
        }
        let queue_size = queue.len();
        drop(queue);
        debug!(queue_size = queue_size, "Staging queue updated");
    }

    /// Materialize each spec once against the current graph state. Nothing is
    /// queued; unresolvable specs are reported and dropped.
    pub fn materialize_once(
        &self,
        specs: &[ConnectionSpec],
        overrides: Option<&DeviceOverrides>,
    ) -> Vec<MapId> {
        let mut created = Vec::new();
        for spec in specs {
            let outcome = materialize(self.graph().as_ref(), spec, overrides);
            self.report_failures(&outcome);
            if outcome.is_complete() {
                info!(spec = %spec.label(), maps = outcome.maps.len(), "Connection created");
                self.emit(ReconcileEvent::Materialized {
                    spec: spec.label(),
                    maps: outcome.maps.clone(),
                });
                created.extend(outcome.maps);
            } else if !outcome.unresolved.is_empty() {
                let missing: Vec<String> =
                    outcome.unresolved.iter().map(|p| p.to_string()).collect();
                warn!(
                    spec = %spec.label(),
                    missing = %missing.join(", "),
                    "Endpoints not available, connection skipped"
                );
            }
        }
        created
    }

    fn report_failures(&self, outcome: &Materialization) {
        for (connection, error) in &outcome.failures {
            self.emit(ReconcileEvent::CreateFailed {
                connection: connection.clone(),
                error: error.to_string(),
            });
        }
    }

    /// One supervision pass over the queue: verify supervised connections,
    /// attempt staged specs, purge expired ones.
    pub fn step(&self) -> StepReport {
        let now = Instant::now();
        let entries = self.queue.lock().drain();
        let mut survivors = Vec::with_capacity(entries.len());
        let mut report = StepReport::default();
        let graph = self.graph().as_ref();

        for mut entry in entries {
            if entry.state == EntryState::Materialized {
                if entry.maps.iter().all(|id| graph.map(*id).is_some()) {
                    survivors.push(entry);
                    continue;
                }
                info!(spec = %entry.spec.label(), "Connection lost, re-staged");
                self.emit(ReconcileEvent::Restaged {
                    spec: entry.spec.label(),
                });
                entry.state = EntryState::Staged;
                entry.maps.clear();
                report.restaged += 1;
            }

            if let Some(deadline) = entry.spec.policy.deadline() {
                if now >= deadline {
                    info!(spec = %entry.spec.label(), "Staged connection timed out");
                    self.emit(ReconcileEvent::Expired {
                        spec: entry.spec.label(),
                    });
                    report.expired += 1;
                    continue;
                }
            }

            let outcome = materialize(graph, &entry.spec, entry.overrides.as_deref());
            self.report_failures(&outcome);

            if outcome.is_complete() {
                info!(spec = %entry.spec.label(), maps = outcome.maps.len(), "Staged connection created");
                self.emit(ReconcileEvent::Materialized {
                    spec: entry.spec.label(),
                    maps: outcome.maps.clone(),
                });
                report.materialized += 1;
                if entry.is_persistent() {
                    entry.state = EntryState::Materialized;
                    entry.maps = outcome.maps;
                    entry.failed_attempts = 0;
                    survivors.push(entry);
                }
            } else if outcome.all_failed() {
                entry.failed_attempts += 1;
                if entry.failed_attempts >= self.config.max_create_attempts {
                    error!(
                        spec = %entry.spec.label(),
                        attempts = entry.failed_attempts,
                        "Giving up on connection after repeated creation failures"
                    );
                    self.emit(ReconcileEvent::Abandoned {
                        spec: entry.spec.label(),
                        attempts: entry.failed_attempts,
                    });
                    report.abandoned += 1;
                } else {
                    survivors.push(entry);
                }
            } else {
                survivors.push(entry);
            }
        }

        report.pending = survivors
            .iter()
            .filter(|e| e.state == EntryState::Staged)
            .count();
        self.queue.lock().restore(survivors);
        report
    }

    /// Poll and step until nothing non-persistent is left queued, or until
    /// shutdown is requested.
    pub async fn run_until_settled(&self) -> Result<(), SessionError> {
        loop {
            if self.shutdown.is_requested() {
                return Ok(());
            }
            self.poll().await?;
            let report = self.step();
            debug!(?report, "Supervision pass");
            if self.queue.lock().is_settled() {
                return Ok(());
            }
        }
    }

    /// Start the background supervisor. Returns `false` if one is already
    /// running.
    pub fn spawn_supervisor(self: &Arc<Self>) -> bool {
        let mut slot = self.supervisor.lock();
        if let Some(handle) = slot.as_ref() {
            if !handle.is_finished() {
                return false;
            }
        }
        let reconciler = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            reconciler.supervise().await;
        }));
        info!("Started connection supervisor");
        true
    }

    pub fn supervisor_running(&self) -> bool {
        self.supervisor
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    async fn supervise(&self) {
        while !self.shutdown.is_requested() {
            if let Err(e) = self.poll().await {
                error!(error = %e, "Graph poll failed, supervisor stopping");
                break;
            }
            if self.shutdown.is_requested() {
                break;
            }
            let report = self.step();
            if report != StepReport::default() {
                debug!(?report, "Supervision pass");
            }
        }
        self.release_graph();
        info!("Connection supervisor stopped");
    }

    /// Drop `tag` from queued specs so they are no longer re-created on its
    /// behalf. Returns the number of specs removed.
    pub fn unstage_tag(&self, tag: &str) -> usize {
        self.queue.lock().remove_tag(tag)
    }

    /// Remove every queued spec.
    pub fn clear_staged(&self) -> usize {
        self.queue.lock().clear()
    }

    fn release_graph(&self) {
        if self.graph.is_owned() {
            if let Err(e) = self.graph().free() {
                warn!(error = %e, "Failed to free graph");
            }
        }
    }

    /// Stop the supervisor, wait for it, and free an owned graph.
    pub async fn shutdown(&self) {
        self.shutdown.request();
        let handle = self.supervisor.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Supervisor task failed");
            }
        }
        self.release_graph();
    }
}
