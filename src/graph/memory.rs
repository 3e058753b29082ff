//! In-process graph.
//!
//! Holds devices, signals and connections in memory. Sources are kept in
//! alphabetical `device/signal` order on creation, the way a canonicalising
//! network would. Optionally backed by a JSON state file so a network
//! description survives between CLI invocations.

use super::{
    DeviceId, Graph, LiveDevice, LiveEndpoint, LiveMap, MapId, MapProperties, MapProperty,
    SignalId,
};
use crate::error::{GraphError, SessionError};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DeviceRecord {
    id: DeviceId,
    name: String,
    #[serde(default)]
    hidden: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SignalRecord {
    id: SignalId,
    device: DeviceId,
    name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MapRecord {
    id: MapId,
    sources: Vec<SignalId>,
    destination: SignalId,
    #[serde(default)]
    properties: MapProperties,
}

/// On-disk form of the graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GraphSnapshot {
    #[serde(default)]
    devices: Vec<DeviceRecord>,
    #[serde(default)]
    signals: Vec<SignalRecord>,
    #[serde(default)]
    maps: Vec<MapRecord>,
}

#[derive(Debug, Default)]
struct GraphState {
    next_id: u64,
    devices: BTreeMap<DeviceId, DeviceRecord>,
    signals: BTreeMap<SignalId, SignalRecord>,
    maps: BTreeMap<MapId, MapRecord>,
    /// Devices registered by this process; never written to the state file.
    local_devices: BTreeSet<DeviceId>,
    updates: HashMap<SignalId, Vec<String>>,
    rejected_destinations: BTreeSet<SignalId>,
}

impl GraphState {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn endpoint(&self, id: SignalId) -> Option<LiveEndpoint> {
        let signal = self.signals.get(&id)?;
        let device = self.devices.get(&signal.device)?;
        Some(LiveEndpoint {
            id,
            device: device.id,
            device_name: device.name.clone(),
            name: signal.name.clone(),
            hidden: device.hidden,
        })
    }

    fn live_map(&self, record: &MapRecord) -> Option<LiveMap> {
        let sources = record
            .sources
            .iter()
            .map(|s| self.endpoint(*s))
            .collect::<Option<Vec<_>>>()?;
        Some(LiveMap {
            id: record.id,
            sources,
            destination: self.endpoint(record.destination)?,
            properties: record.properties.clone(),
        })
    }

    fn full_name(&self, id: SignalId) -> String {
        self.endpoint(id)
            .map(|e| e.full_name())
            .unwrap_or_default()
    }

    fn drop_maps_touching(&mut self, signals: &BTreeSet<SignalId>) -> usize {
        let before = self.maps.len();
        self.maps.retain(|_, m| {
            !signals.contains(&m.destination) && !m.sources.iter().any(|s| signals.contains(s))
        });
        before - self.maps.len()
    }

    fn snapshot(&self) -> GraphSnapshot {
        let local_signals: BTreeSet<SignalId> = self
            .signals
            .values()
            .filter(|s| self.local_devices.contains(&s.device))
            .map(|s| s.id)
            .collect();
        GraphSnapshot {
            devices: self
                .devices
                .values()
                .filter(|d| !self.local_devices.contains(&d.id))
                .cloned()
                .collect(),
            signals: self
                .signals
                .values()
                .filter(|s| !local_signals.contains(&s.id))
                .cloned()
                .collect(),
            maps: self
                .maps
                .values()
                .filter(|m| {
                    !local_signals.contains(&m.destination)
                        && !m.sources.iter().any(|s| local_signals.contains(s))
                })
                .cloned()
                .collect(),
        }
    }

    fn restore(snapshot: GraphSnapshot) -> Self {
        let mut state = GraphState::default();
        for device in snapshot.devices {
            state.next_id = state.next_id.max(device.id.0);
            state.devices.insert(device.id, device);
        }
        for signal in snapshot.signals {
            state.next_id = state.next_id.max(signal.id.0);
            state.signals.insert(signal.id, signal);
        }
        for map in snapshot.maps {
            state.next_id = state.next_id.max(map.id.0);
            state.maps.insert(map.id, map);
        }
        state
    }
}

/// In-memory `Graph` implementation.
#[derive(Debug, Default)]
pub struct MemoryGraph {
    state: RwLock<GraphState>,
    state_file: Option<PathBuf>,
    freed: AtomicBool,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a graph backed by `path`. A missing file starts an empty graph.
    pub fn open(path: &Path) -> Result<Self, SessionError> {
        let state = if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| SessionError::io(path, e))?;
            let snapshot: GraphSnapshot = serde_json::from_str(&content).map_err(|e| {
                GraphError::State(format!("Invalid graph state file {:?}: {}", path, e))
            })?;
            GraphState::restore(snapshot)
        } else {
            GraphState::default()
        };
        info!(
            state_file = %path.display(),
            devices = state.devices.len(),
            maps = state.maps.len(),
            "Opened graph state"
        );
        Ok(Self {
            state: RwLock::new(state),
            state_file: Some(path.to_path_buf()),
            freed: AtomicBool::new(false),
        })
    }

    /// Write the current state to the backing file, if any.
    pub fn flush(&self) -> Result<(), SessionError> {
        let Some(path) = &self.state_file else {
            return Ok(());
        };
        let snapshot = self.state.read().snapshot();
        let content = serde_json::to_string_pretty(&snapshot)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| SessionError::io(parent, e))?;
            }
        }
        std::fs::write(path, content).map_err(|e| SessionError::io(path, e))?;
        debug!(state_file = %path.display(), "Flushed graph state");
        Ok(())
    }

    fn check_live(&self) -> Result<(), GraphError> {
        if self.freed.load(Ordering::Acquire) {
            Err(GraphError::Freed)
        } else {
            Ok(())
        }
    }

    /// Announce a remote device.
    pub fn add_device(&self, name: &str) -> DeviceId {
        self.insert_device(name, false)
    }

    /// Announce a remote device that is hidden from user-facing resolution.
    pub fn add_hidden_device(&self, name: &str) -> DeviceId {
        self.insert_device(name, true)
    }

    fn insert_device(&self, name: &str, hidden: bool) -> DeviceId {
        let mut state = self.state.write();
        let id = DeviceId(state.next());
        state.devices.insert(
            id,
            DeviceRecord {
                id,
                name: name.to_string(),
                hidden,
            },
        );
        id
    }

    /// Announce a signal on an existing device.
    pub fn add_signal(&self, device: DeviceId, name: &str) -> Result<SignalId, GraphError> {
        let mut state = self.state.write();
        if !state.devices.contains_key(&device) {
            return Err(GraphError::UnknownDevice(device.0));
        }
        let id = SignalId(state.next());
        state.signals.insert(
            id,
            SignalRecord {
                id,
                device,
                name: name.to_string(),
            },
        );
        Ok(id)
    }

    /// Remove a device, its signals, and every connection touching them.
    pub fn remove_device(&self, device: DeviceId) -> Result<(), GraphError> {
        let mut state = self.state.write();
        if state.devices.remove(&device).is_none() {
            return Err(GraphError::UnknownDevice(device.0));
        }
        let signals: BTreeSet<SignalId> = state
            .signals
            .values()
            .filter(|s| s.device == device)
            .map(|s| s.id)
            .collect();
        state.signals.retain(|id, _| !signals.contains(id));
        let dropped = state.drop_maps_touching(&signals);
        state.local_devices.remove(&device);
        debug!(device = %device, dropped_maps = dropped, "Device removed from graph");
        Ok(())
    }

    /// Deliver a value to a local input signal.
    pub fn push_update(&self, signal: SignalId, value: &str) {
        self.state
            .write()
            .updates
            .entry(signal)
            .or_default()
            .push(value.to_string());
    }

    /// Refuse any connection into `destination`.
    pub fn reject_connections_to(&self, destination: SignalId) {
        self.state.write().rejected_destinations.insert(destination);
    }

    pub fn map_count(&self) -> usize {
        self.state.read().maps.len()
    }
}

#[async_trait]
impl Graph for MemoryGraph {
    async fn poll(&self, timeout: Duration) -> Result<(), GraphError> {
        self.check_live()?;
        tokio::time::sleep(timeout).await;
        Ok(())
    }

    fn devices(&self) -> Vec<LiveDevice> {
        self.state
            .read()
            .devices
            .values()
            .map(|d| LiveDevice {
                id: d.id,
                name: d.name.clone(),
                hidden: d.hidden,
            })
            .collect()
    }

    fn device(&self, id: DeviceId) -> Option<LiveDevice> {
        self.state.read().devices.get(&id).map(|d| LiveDevice {
            id: d.id,
            name: d.name.clone(),
            hidden: d.hidden,
        })
    }

    fn signals(&self, name: Option<&str>) -> Vec<LiveEndpoint> {
        let state = self.state.read();
        state
            .signals
            .values()
            .filter(|s| name.map_or(true, |n| s.name == n))
            .filter_map(|s| state.endpoint(s.id))
            .collect()
    }

    fn maps(&self, tag: Option<&str>) -> Vec<LiveMap> {
        let state = self.state.read();
        state
            .maps
            .values()
            .filter(|m| tag.map_or(true, |t| m.properties.tags.iter().any(|x| x == t)))
            .filter_map(|m| state.live_map(m))
            .collect()
    }

    fn map(&self, id: MapId) -> Option<LiveMap> {
        let state = self.state.read();
        state.maps.get(&id).and_then(|m| state.live_map(m))
    }

    fn create_map(&self, sources: &[SignalId], destination: SignalId) -> Result<MapId, GraphError> {
        self.check_live()?;
        let mut state = self.state.write();
        if sources.is_empty() {
            return Err(GraphError::Rejected("connection needs at least one source".to_string()));
        }
        for id in sources.iter().chain(std::iter::once(&destination)) {
            if !state.signals.contains_key(id) {
                return Err(GraphError::UnknownSignal(id.0));
            }
        }
        if sources.contains(&destination) {
            return Err(GraphError::Rejected(format!(
                "{} cannot be connected to itself",
                state.full_name(destination)
            )));
        }
        let unique: BTreeSet<SignalId> = sources.iter().copied().collect();
        if unique.len() != sources.len() {
            return Err(GraphError::Rejected("duplicate source signal".to_string()));
        }
        if state.rejected_destinations.contains(&destination) {
            return Err(GraphError::Rejected(format!(
                "{} refuses incoming connections",
                state.full_name(destination)
            )));
        }

        if let Some(existing) = state.maps.values().find(|m| {
            m.destination == destination
                && m.sources.len() == unique.len()
                && m.sources.iter().all(|s| unique.contains(s))
        }) {
            return Ok(existing.id);
        }

        let mut ordered: Vec<SignalId> = sources.to_vec();
        ordered.sort_by_key(|id| state.full_name(*id));
        let id = MapId(state.next());
        state.maps.insert(
            id,
            MapRecord {
                id,
                sources: ordered,
                destination,
                properties: MapProperties {
                    expression: "y=x".to_string(),
                    ..MapProperties::default()
                },
            },
        );
        Ok(id)
    }

    fn set_map_property(&self, id: MapId, property: MapProperty) -> Result<(), GraphError> {
        self.check_live()?;
        let mut state = self.state.write();
        let record = state.maps.get_mut(&id).ok_or(GraphError::UnknownMap(id.0))?;
        let properties = &mut record.properties;
        match property {
            MapProperty::Expression(v) => properties.expression = v,
            MapProperty::Muted(v) => properties.muted = v,
            MapProperty::ProcessLocation(v) => properties.process_location = v,
            MapProperty::Protocol(v) => properties.protocol = v,
            MapProperty::UseInstances(v) => properties.use_instances = v,
            MapProperty::Version(v) => properties.version = v,
            MapProperty::Scope(v) => properties.scope = v,
            MapProperty::Tags(v) => properties.tags = v,
            MapProperty::Extra(key, v) => {
                properties.extra.insert(key, v);
            }
        }
        Ok(())
    }

    fn release_map(&self, id: MapId) -> Result<(), GraphError> {
        self.check_live()?;
        self.state
            .write()
            .maps
            .remove(&id)
            .map(|_| ())
            .ok_or(GraphError::UnknownMap(id.0))
    }

    fn register_device(&self, name: &str, hidden: bool) -> Result<DeviceId, GraphError> {
        self.check_live()?;
        let id = self.insert_device(name, hidden);
        self.state.write().local_devices.insert(id);
        Ok(id)
    }

    fn register_input(&self, device: DeviceId, name: &str) -> Result<SignalId, GraphError> {
        self.check_live()?;
        self.add_signal(device, name)
    }

    fn take_updates(&self, signal: SignalId) -> Vec<String> {
        self.state
            .write()
            .updates
            .remove(&signal)
            .unwrap_or_default()
    }

    fn free(&self) -> Result<(), GraphError> {
        if self.freed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.flush()
            .map_err(|e| GraphError::State(format!("Failed to flush graph state: {}", e)))?;
        info!("Graph freed");
        Ok(())
    }
}
