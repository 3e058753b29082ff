//! Interactive mode: load and unload requests arriving over the graph.
//!
//! A hidden management device exposes two inputs. Values written to `load`
//! are document paths, loaded with supervision; values written to `unload`
//! are tags or document paths.

use crate::error::SessionError;
use crate::graph::{DeviceId, SignalId};
use crate::persistence::{self, tag_for_target, DocumentSource, LoadOptions};
use crate::reconciler::{ReconcileEvent, Reconciler};
use crate::registry::SessionRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

pub const LOAD_INPUT: &str = "load";
pub const UNLOAD_INPUT: &str = "unload";

/// The management device and its request handlers.
pub struct InteractiveSession {
    reconciler: Arc<Reconciler>,
    registry: SessionRegistry,
    device: DeviceId,
    load_input: SignalId,
    unload_input: SignalId,
}

impl InteractiveSession {
    /// Register the management device on the reconciler's graph.
    pub fn register(reconciler: Arc<Reconciler>) -> Result<Self, SessionError> {
        let graph = reconciler.graph();
        let name = reconciler.config().management_device.clone();
        let device = graph.register_device(&name, true)?;
        let load_input = graph.register_input(device, LOAD_INPUT)?;
        let unload_input = graph.register_input(device, UNLOAD_INPUT)?;
        info!(device = %name, "Registered management device");
        Ok(Self {
            registry: SessionRegistry::new(Arc::clone(&reconciler)),
            reconciler,
            device,
            load_input,
            unload_input,
        })
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn load_input(&self) -> SignalId {
        self.load_input
    }

    pub fn unload_input(&self) -> SignalId {
        self.unload_input
    }

    /// Poll until shutdown is requested, handling requests after each poll.
    /// Shuts the reconciler down on exit.
    pub async fn run(&self) -> Result<(), SessionError> {
        info!("Interactive mode running");
        let result = loop {
            if self.reconciler.shutdown_flag().is_requested() {
                break Ok(());
            }
            if let Err(e) = self.reconciler.poll().await {
                break Err(e);
            }
            self.handle_pending().await;
        };
        self.reconciler.shutdown().await;
        info!("Interactive mode stopped");
        result
    }

    /// Handle every request received since the last call. Returns how many
    /// were handled; failures are logged and published, never returned.
    pub async fn handle_pending(&self) -> usize {
        let graph = self.reconciler.graph();
        let loads = graph.take_updates(self.load_input);
        let unloads = graph.take_updates(self.unload_input);
        let handled = loads.len() + unloads.len();

        for payload in loads {
            if let Err(e) = self.handle_load(&payload).await {
                self.report_failure(LOAD_INPUT, &payload, &e);
            }
        }
        for payload in unloads {
            if let Err(e) = self.handle_unload(&payload) {
                self.report_failure(UNLOAD_INPUT, &payload, &e);
            }
        }
        handled
    }

    async fn handle_load(&self, payload: &str) -> Result<(), SessionError> {
        let path = PathBuf::from(payload.trim());
        let options = LoadOptions {
            persist: true,
            ..LoadOptions::default()
        };
        persistence::load(&self.reconciler, DocumentSource::Path(path), options).await?;
        Ok(())
    }

    fn handle_unload(&self, payload: &str) -> Result<(), SessionError> {
        let tag = tag_for_target(payload);
        self.registry.release_tag(&tag)?;
        Ok(())
    }

    fn report_failure(&self, handler: &str, payload: &str, e: &SessionError) {
        error!(handler = handler, payload = payload, error = %e, "Request handler failed");
        self.reconciler.emit(ReconcileEvent::HandlerFailed {
            handler: handler.to_string(),
            error: e.to_string(),
        });
    }
}
