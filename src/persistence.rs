//! Persistence
//!
//! Save snapshots the live graph into a session document; load reads a
//! document, brings it to the current version, validates it and hands its
//! specs to the reconciler.
//!
//! Loading is all-or-nothing up to the point where specs are staged: parse,
//! upgrade and schema validation all complete before the graph is touched.

use crate::document::{
    add_tag, ConnectionSpec, EndpointPattern, SessionDocument, StagePolicy, View,
};
use crate::document::schema::SchemaValidator;
use crate::error::{DocumentError, SessionError};
use crate::graph::{Graph, LiveMap, MapProperty};
use crate::reconciler::Reconciler;
use crate::resolver::DeviceOverrides;
use crate::upgrade;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tag used when none is given and the document has no file name.
pub const DEFAULT_TAG: &str = "session";

/// Options for [`save`].
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// File to write; `None` only builds the document.
    pub target: Option<PathBuf>,
    pub description: String,
    /// Tag stamped onto every snapshotted connection.
    pub tag: Option<String>,
    /// View blobs to embed unchanged.
    pub views: Vec<View>,
}

/// How long a load waits for endpoints that are not yet available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Wait {
    /// Materialize once against the current graph.
    #[default]
    No,
    /// Stage until the endpoints appear.
    Forever,
    /// Stage until the endpoints appear or the duration elapses.
    For(Duration),
}

impl Wait {
    pub fn is_waiting(&self) -> bool {
        !matches!(self, Wait::No)
    }
}

/// Options for [`load`].
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Session tag; defaults to the document's file stem.
    pub tag: Option<String>,
    pub wait: Wait,
    /// Keep the specs under supervision and re-create vanished connections.
    pub persist: bool,
    pub overrides: Option<DeviceOverrides>,
}

/// Where a document comes from.
#[derive(Debug, Clone)]
pub enum DocumentSource {
    Path(PathBuf),
    Value(Value),
}

impl DocumentSource {
    /// Default tag for this source.
    pub fn default_tag(&self) -> String {
        match self {
            DocumentSource::Path(path) => tag_for_path(path),
            DocumentSource::Value(_) => DEFAULT_TAG.to_string(),
        }
    }
}

/// Tag derived from a document path: its file stem.
pub fn tag_for_path(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_TAG)
        .to_string()
}

/// Tag named by an unload target: a tag as-is, or a document path's file stem.
pub fn tag_for_target(target: &str) -> String {
    let target = target.trim();
    if target.contains('/') || Path::new(target).extension().is_some() {
        tag_for_path(Path::new(target))
    } else {
        target.to_string()
    }
}

/// Read a document file as JSON.
pub fn read_document(path: &Path) -> Result<Value, SessionError> {
    let content = std::fs::read_to_string(path).map_err(|e| SessionError::io(path, e))?;
    let value: Value = serde_json::from_str(&content).map_err(|e| {
        DocumentError::Malformed(format!("{}: {}", path.display(), e))
    })?;
    Ok(value)
}

/// Upgrade, validate and deserialize a raw document.
pub fn parse_document(raw: Value) -> Result<SessionDocument, DocumentError> {
    let current = upgrade::upgrade(raw)?;
    SchemaValidator::bundled()?.validate(&current)?;
    SessionDocument::from_value(current)
}

/// Snapshot the live graph into a document.
///
/// Polls once first. Connections touching a hidden device or the management
/// device are skipped. With a tag, every snapshotted connection gains it on
/// the live graph as well.
pub async fn save(
    reconciler: &Reconciler,
    options: SaveOptions,
) -> Result<SessionDocument, SessionError> {
    reconciler.poll().await?;
    let graph = reconciler.graph().as_ref();
    let management = &reconciler.config().management_device;

    let mut document = SessionDocument::new(&options.description);
    document.views = options.views;

    for map in graph.maps(None) {
        if map.touches_hidden() || map.touches_device(management) {
            debug!(map = %map.id, "Skipping internal connection");
            continue;
        }
        let mut tags = map.properties.tags.clone();
        if let Some(tag) = &options.tag {
            if add_tag(&mut tags, tag) {
                graph.set_map_property(map.id, MapProperty::Tags(tags.clone()))?;
            }
        }
        document.maps.push(snapshot_spec(graph, &map, tags));
    }

    if let Some(target) = &options.target {
        let content = document.to_json_pretty()?;
        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| SessionError::io(parent, e))?;
            }
        }
        std::fs::write(target, content).map_err(|e| SessionError::io(target, e))?;
        info!(
            path = %target.display(),
            maps = document.maps.len(),
            "Saved session"
        );
    }
    Ok(document)
}

fn snapshot_spec(graph: &dyn Graph, map: &LiveMap, tags: Vec<String>) -> ConnectionSpec {
    let sources = map
        .sources
        .iter()
        .map(|s| EndpointPattern::new(&s.device_name, &s.name))
        .collect();
    let destination = EndpointPattern::new(&map.destination.device_name, &map.destination.name);
    let properties = &map.properties;

    let mut spec = ConnectionSpec::new(sources, destination, &properties.expression);
    spec.muted = properties.muted;
    spec.process_location = properties.process_location;
    spec.protocol = properties.protocol;
    spec.use_instances = properties.use_instances;
    spec.property_version = properties.version;
    spec.session_tags = tags;
    spec.extra = properties.extra.clone();
    if !properties.scope.is_empty() {
        let names = properties
            .scope
            .iter()
            .filter_map(|id| graph.device(*id))
            .map(|d| d.name)
            .collect();
        spec.scope = Some(names);
    }
    spec
}

/// Load a document and hand its connections to the reconciler.
///
/// Returns the document's views unchanged.
///
/// * no wait, no persist: one poll, then one materialization pass.
/// * `persist`: queued under supervision and the background supervisor is
///   started if needed.
/// * wait without persist: queued; if no supervisor is running the call
///   drives the queue itself until it settles.
pub async fn load(
    reconciler: &Arc<Reconciler>,
    source: DocumentSource,
    options: LoadOptions,
) -> Result<Vec<View>, SessionError> {
    if reconciler.shutdown_flag().is_requested() {
        return Err(SessionError::ShutDown);
    }
    let tag = options.tag.clone().unwrap_or_else(|| source.default_tag());
    let raw = match source {
        DocumentSource::Path(path) => read_document(&path)?,
        DocumentSource::Value(value) => value,
    };
    let document = parse_document(raw)?;
    if !document.values.is_empty() {
        warn!(
            count = document.values.len(),
            "Initial signal values are not applied"
        );
    }

    let policy = if options.persist {
        StagePolicy::Persist
    } else {
        match options.wait {
            Wait::No | Wait::Forever => StagePolicy::Once,
            Wait::For(timeout) => StagePolicy::Until(tokio::time::Instant::now() + timeout),
        }
    };

    let SessionDocument { maps, views, .. } = document;
    let specs: Vec<ConnectionSpec> = maps
        .into_iter()
        .map(|mut spec| {
            spec.add_tag(&tag);
            spec.policy = policy;
            spec
        })
        .collect();
    info!(tag = %tag, maps = specs.len(), policy = ?policy, "Loading session");

    if options.persist {
        reconciler.enqueue(specs, options.overrides.map(Arc::new));
        reconciler.spawn_supervisor();
    } else if options.wait.is_waiting() {
        reconciler.enqueue(specs, options.overrides.map(Arc::new));
        if !reconciler.supervisor_running() {
            reconciler.run_until_settled().await?;
        }
    } else {
        reconciler.poll().await?;
        reconciler.materialize_once(&specs, options.overrides.as_ref());
    }
    Ok(views)
}
