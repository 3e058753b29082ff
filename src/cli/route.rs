//! CLI route: run context and the single route table. Dispatches each
//! operation to the library and formats its result.

use crate::cli::help::operation_name;
use crate::cli::parse::Operation;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::graph::{Graph, MemoryGraph};
use crate::interactive::InteractiveSession;
use crate::persistence::{
    self, tag_for_path, tag_for_target, DocumentSource, LoadOptions, SaveOptions,
};
use crate::reconciler::{GraphHandle, Reconciler};
use crate::registry::SessionRegistry;
use crate::shutdown::ShutdownFlag;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Runtime context for one CLI invocation: effective config, the graph and
/// the reconciler that owns it.
pub struct RunContext {
    config: SessionConfig,
    reconciler: Arc<Reconciler>,
    registry: SessionRegistry,
}

impl RunContext {
    /// Open the graph described by `config` and build a reconciler owning it.
    pub fn new(config: SessionConfig, shutdown: ShutdownFlag) -> Result<Self, SessionError> {
        let graph: Arc<dyn Graph> = match &config.graph.state_file {
            Some(path) => Arc::new(MemoryGraph::open(path)?),
            None => Arc::new(MemoryGraph::new()),
        };
        Ok(Self::with_graph(config, GraphHandle::Owned(graph), shutdown))
    }

    /// Use a caller-supplied graph.
    pub fn with_graph(config: SessionConfig, graph: GraphHandle, shutdown: ShutdownFlag) -> Self {
        let reconciler = Arc::new(Reconciler::with_shutdown(
            graph,
            config.reconciler.to_reconciler_config(),
            shutdown,
        ));
        Self {
            registry: SessionRegistry::new(Arc::clone(&reconciler)),
            config,
            reconciler,
        }
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Execute one operation via the route table, then shut the reconciler
    /// down. Returns the text to print.
    pub async fn execute(&self, operation: &Operation) -> Result<String, SessionError> {
        let started = Instant::now();
        let name = operation_name(operation);
        info!(operation = name, "Running operation");
        let result = self.execute_inner(operation).await;
        self.reconciler.shutdown().await;
        debug!(
            operation = name,
            ok = result.is_ok(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Operation finished"
        );
        result
    }

    async fn execute_inner(&self, operation: &Operation) -> Result<String, SessionError> {
        match operation {
            Operation::Save {
                path,
                description,
                tag,
            } => self.handle_save(path, description, tag.clone()).await,
            Operation::Load {
                paths,
                tag,
                wait,
                persist,
                overrides,
            } => {
                let options = LoadOptions {
                    tag: tag.clone(),
                    wait: *wait,
                    persist: *persist,
                    overrides: overrides.clone(),
                };
                self.handle_load(paths, options).await
            }
            Operation::Unload { targets } => self.handle_unload(targets).await,
            Operation::Clear { tag } => {
                let report = self.registry.clear(tag.as_deref()).await?;
                Ok(format!("Cleared: {}", report.summary()))
            }
            Operation::Tags => {
                let tags = self.registry.tags().await?;
                Ok(tags.into_iter().collect::<Vec<_>>().join("\n"))
            }
            Operation::Interactive => {
                let session = InteractiveSession::register(Arc::clone(&self.reconciler))?;
                session.run().await?;
                Ok(String::new())
            }
            Operation::PrintConfig => self.config.to_toml(),
        }
    }

    async fn handle_save(
        &self,
        path: &Path,
        description: &str,
        tag: Option<String>,
    ) -> Result<String, SessionError> {
        let options = SaveOptions {
            target: Some(path.to_path_buf()),
            description: description.to_string(),
            tag: Some(tag.unwrap_or_else(|| tag_for_path(path))),
            views: Vec::new(),
        };
        let document = persistence::save(&self.reconciler, options).await?;
        Ok(format!(
            "Saved {} connection(s) to {}",
            document.maps.len(),
            path.display()
        ))
    }

    async fn handle_load(
        &self,
        paths: &[PathBuf],
        options: LoadOptions,
    ) -> Result<String, SessionError> {
        let mut lines = Vec::new();
        for path in paths {
            let source = DocumentSource::Path(path.clone());
            let tag = options.tag.clone().unwrap_or_else(|| source.default_tag());
            let views = persistence::load(&self.reconciler, source, options.clone()).await?;
            lines.push(format!(
                "Loaded {} as session '{}' ({} view(s))",
                path.display(),
                tag,
                views.len()
            ));
        }
        if options.persist {
            info!("Supervising loaded sessions until interrupted");
            self.wait_for_shutdown().await;
        }
        Ok(lines.join("\n"))
    }

    async fn handle_unload(&self, targets: &[String]) -> Result<String, SessionError> {
        let mut lines = Vec::new();
        for target in targets {
            let tag = tag_for_target(target);
            let report = self.registry.unload(&tag).await?;
            lines.push(format!("Unloaded '{}': {}", tag, report.summary()));
        }
        Ok(lines.join("\n"))
    }

    async fn wait_for_shutdown(&self) {
        let interval = self.reconciler.config().poll_interval;
        while !self.reconciler.shutdown_flag().is_requested() {
            tokio::time::sleep(interval).await;
        }
    }
}
