//! Session Document Model
//!
//! Declarative description of a session: the connections it wants, the GUI
//! views that travel with it, and reserved initial values. Pure data; the
//! reconciler and persistence layers give it behavior.

use crate::error::DocumentError;
use crate::expression;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tokio::time::Instant;

pub mod schema;

/// Document version written by this crate.
pub const CURRENT_FILE_VERSION: &str = "2.4";

/// Oldest document version the upgrader accepts.
pub const MIN_FILE_VERSION: &str = "2.0";

/// Which side of a connection evaluates its expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Location {
    #[default]
    #[serde(rename = "SOURCE", alias = "source")]
    Source,
    #[serde(rename = "DESTINATION", alias = "destination")]
    Destination,
}

/// Transport used by a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Protocol {
    #[default]
    #[serde(rename = "UDP", alias = "udp")]
    Udp,
    #[serde(rename = "TCP", alias = "tcp")]
    Tcp,
}

/// `device/signal` pattern naming an endpoint by its logical name.
///
/// The device part is matched literally only when a device-name override is
/// supplied for it; otherwise it acts as a wildcard (see `resolver`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointPattern {
    raw: String,
    split: usize,
}

impl EndpointPattern {
    pub fn parse(raw: impl Into<String>) -> Result<Self, DocumentError> {
        let raw = raw.into();
        match raw.find('/') {
            Some(split) if split > 0 && split + 1 < raw.len() => Ok(Self { raw, split }),
            _ => Err(DocumentError::InvalidPattern(raw)),
        }
    }

    pub fn new(device: &str, signal: &str) -> Self {
        Self {
            raw: format!("{}/{}", device, signal),
            split: device.len(),
        }
    }

    pub fn device(&self) -> &str {
        &self.raw[..self.split]
    }

    pub fn signal(&self) -> &str {
        &self.raw[self.split + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for EndpointPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for EndpointPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for EndpointPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        EndpointPattern::parse(raw).map_err(serde::de::Error::custom)
    }
}

/// How a spec is supervised once handed to the reconciler.
///
/// Persisting and timing out are mutually exclusive by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StagePolicy {
    /// Staged until materialized, with no deadline.
    #[default]
    Once,
    /// Staged until materialized or the deadline passes.
    Until(Instant),
    /// Kept under supervision indefinitely, re-staged when its connection vanishes.
    Persist,
}

impl StagePolicy {
    pub fn is_persistent(&self) -> bool {
        matches!(self, StagePolicy::Persist)
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self {
            StagePolicy::Until(at) => Some(*at),
            _ => None,
        }
    }
}

/// Declarative description of one desired connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSpec {
    pub sources: Vec<EndpointPattern>,

    /// Only the first declared destination is honoured; multi-destination
    /// documents keep their extra entries out of the live graph.
    #[serde(
        rename = "destinations",
        serialize_with = "serialize_destination",
        deserialize_with = "deserialize_destination"
    )]
    pub destination: EndpointPattern,

    pub expression: String,

    #[serde(default)]
    pub muted: bool,

    #[serde(rename = "process_loc", default)]
    pub process_location: Location,

    #[serde(default)]
    pub protocol: Protocol,

    #[serde(rename = "use_inst", default)]
    pub use_instances: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Vec<String>>,

    #[serde(rename = "version", default)]
    pub property_version: i64,

    #[serde(rename = "tags", default, skip_serializing_if = "Vec::is_empty")]
    pub session_tags: Vec<String>,

    /// Keys this crate does not model, carried through verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,

    /// Set by the load path only, never read from or written to documents.
    #[serde(skip)]
    pub policy: StagePolicy,
}

fn serialize_destination<S: Serializer>(
    destination: &EndpointPattern,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    use serde::ser::SerializeSeq;
    let mut seq = serializer.serialize_seq(Some(1))?;
    seq.serialize_element(destination)?;
    seq.end()
}

fn deserialize_destination<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<EndpointPattern, D::Error> {
    let destinations = Vec::<EndpointPattern>::deserialize(deserializer)?;
    if destinations.len() > 1 {
        tracing::warn!(
            ignored = destinations.len() - 1,
            "Only the first destination of a connection is used"
        );
    }
    destinations
        .into_iter()
        .next()
        .ok_or_else(|| serde::de::Error::custom("connection has no destination"))
}

impl ConnectionSpec {
    /// Spec with default properties and no tags.
    pub fn new(sources: Vec<EndpointPattern>, destination: EndpointPattern, expression: &str) -> Self {
        Self {
            sources,
            destination,
            expression: expression.to_string(),
            muted: false,
            process_location: Location::default(),
            protocol: Protocol::default(),
            use_instances: false,
            scope: None,
            property_version: 0,
            session_tags: Vec::new(),
            extra: BTreeMap::new(),
            policy: StagePolicy::default(),
        }
    }

    /// Check structural invariants that do not depend on the live graph.
    pub fn check(&self) -> Result<(), DocumentError> {
        if self.sources.is_empty() {
            return Err(DocumentError::MissingEndpoints("sources"));
        }
        if expression::has_unindexed_source(&self.expression) {
            return Err(DocumentError::UnindexedSource(self.expression.clone()));
        }
        if let Some(index) = expression::max_source_index(&self.expression) {
            if index >= self.sources.len() {
                return Err(DocumentError::SourceIndexOutOfRange {
                    expression: self.expression.clone(),
                    index,
                    sources: self.sources.len(),
                });
            }
        }
        Ok(())
    }

    /// Append `tag` unless already present. Returns whether it was added.
    pub fn add_tag(&mut self, tag: &str) -> bool {
        add_tag(&mut self.session_tags, tag)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.session_tags.iter().any(|t| t == tag)
    }

    /// Human-readable `a/x, b/y -> c/z` label for logs.
    pub fn label(&self) -> String {
        let sources: Vec<&str> = self.sources.iter().map(|s| s.as_str()).collect();
        format!("{} -> {}", sources.join(", "), self.destination)
    }
}

/// Append `tag` to `tags` unless already present.
pub fn add_tag(tags: &mut Vec<String>, tag: &str) -> bool {
    if tags.iter().any(|t| t == tag) {
        false
    } else {
        tags.push(tag.to_string());
        true
    }
}

/// Reserved initial signal value. Declared by the format, never applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalValue {
    pub name: String,
    pub value: Value,
}

/// Opaque GUI view blob, passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub name: String,
    pub data: Value,
}

/// A whole session document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDocument {
    #[serde(rename = "fileversion")]
    pub file_version: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub values: Vec<SignalValue>,

    #[serde(default)]
    pub views: Vec<View>,

    #[serde(default)]
    pub maps: Vec<ConnectionSpec>,
}

impl SessionDocument {
    /// Empty document at the current version.
    pub fn new(description: &str) -> Self {
        Self {
            file_version: CURRENT_FILE_VERSION.to_string(),
            description: description.to_string(),
            values: Vec::new(),
            views: Vec::new(),
            maps: Vec::new(),
        }
    }

    /// Deserialize an already upgraded and validated JSON value.
    pub fn from_value(value: Value) -> Result<Self, DocumentError> {
        let document: SessionDocument = serde_json::from_value(value)?;
        for spec in &document.maps {
            spec.check()?;
        }
        Ok(document)
    }

    pub fn to_json_pretty(&self) -> Result<String, DocumentError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Look up a view blob by name.
    pub fn view(&self, name: &str) -> Option<&Value> {
        self.views.iter().find(|v| v.name == name).map(|v| &v.data)
    }
}
