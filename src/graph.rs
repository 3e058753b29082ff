//! Graph Collaborator
//!
//! The live, externally discovered endpoint network. Everything above this
//! trait works on snapshots and handles; only the graph creates or destroys
//! live connections.

use crate::document::{Location, Protocol};
use crate::error::GraphError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

pub mod memory;

pub use memory::MemoryGraph;

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

handle_type!(
    /// Handle to a live device.
    DeviceId
);
handle_type!(
    /// Handle to a live signal (endpoint).
    SignalId
);
handle_type!(
    /// Handle to a live connection.
    MapId
);

/// Snapshot of a live device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveDevice {
    pub id: DeviceId,
    pub name: String,
    pub hidden: bool,
}

/// Snapshot of a live endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LiveEndpoint {
    pub id: SignalId,
    pub device: DeviceId,
    pub device_name: String,
    pub name: String,
    /// Hidden flag of the owning device.
    pub hidden: bool,
}

impl LiveEndpoint {
    /// `device/signal` full name.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.device_name, self.name)
    }
}

/// Property set of a live connection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MapProperties {
    pub expression: String,
    pub muted: bool,
    pub process_location: Location,
    pub protocol: Protocol,
    pub use_instances: bool,
    pub version: i64,
    pub scope: Vec<DeviceId>,
    pub tags: Vec<String>,
    pub extra: BTreeMap<String, Value>,
}

/// Snapshot of a live connection.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveMap {
    pub id: MapId,
    /// Sources in the graph's canonical order.
    pub sources: Vec<LiveEndpoint>,
    pub destination: LiveEndpoint,
    pub properties: MapProperties,
}

impl LiveMap {
    /// Whether any endpoint belongs to a hidden device.
    pub fn touches_hidden(&self) -> bool {
        self.destination.hidden || self.sources.iter().any(|s| s.hidden)
    }

    /// Whether any endpoint belongs to the named device.
    pub fn touches_device(&self, device_name: &str) -> bool {
        self.destination.device_name == device_name
            || self.sources.iter().any(|s| s.device_name == device_name)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.properties.tags.iter().any(|t| t == tag)
    }

    /// Position of a signal among this connection's sources.
    pub fn source_position(&self, signal: SignalId) -> Option<usize> {
        self.sources.iter().position(|s| s.id == signal)
    }
}

/// A single property assignment on a live connection.
#[derive(Debug, Clone, PartialEq)]
pub enum MapProperty {
    Expression(String),
    Muted(bool),
    ProcessLocation(Location),
    Protocol(Protocol),
    UseInstances(bool),
    Version(i64),
    Scope(Vec<DeviceId>),
    Tags(Vec<String>),
    Extra(String, Value),
}

/// The endpoint-discovery substrate.
///
/// Implementations are shared process-wide behind an `Arc`, so every method
/// takes `&self` and must be safe to call from the supervisor task and a
/// foreground caller at once.
#[async_trait]
pub trait Graph: Send + Sync {
    /// Advance discovery state, waiting up to `timeout`.
    async fn poll(&self, timeout: Duration) -> Result<(), GraphError>;

    fn devices(&self) -> Vec<LiveDevice>;

    fn device(&self, id: DeviceId) -> Option<LiveDevice>;

    /// Endpoints whose signal name equals `name`, or all of them.
    fn signals(&self, name: Option<&str>) -> Vec<LiveEndpoint>;

    /// Live connections, optionally only those carrying `tag`.
    fn maps(&self, tag: Option<&str>) -> Vec<LiveMap>;

    fn map(&self, id: MapId) -> Option<LiveMap>;

    /// Create a connection. If the endpoints are already connected the
    /// existing handle is returned.
    fn create_map(&self, sources: &[SignalId], destination: SignalId) -> Result<MapId, GraphError>;

    fn set_map_property(&self, id: MapId, property: MapProperty) -> Result<(), GraphError>;

    fn release_map(&self, id: MapId) -> Result<(), GraphError>;

    /// Register a local device, used for the management endpoint.
    fn register_device(&self, name: &str, hidden: bool) -> Result<DeviceId, GraphError>;

    /// Register an input signal on a local device.
    fn register_input(&self, device: DeviceId, name: &str) -> Result<SignalId, GraphError>;

    /// Drain updates received on a local input signal since the last call.
    fn take_updates(&self, signal: SignalId) -> Vec<String>;

    /// Release the graph's resources. Further calls fail with `GraphError::Freed`.
    fn free(&self) -> Result<(), GraphError>;
}
