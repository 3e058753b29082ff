//! Legacy Document Upgrade
//!
//! Brings older session documents up to the current format through a fixed
//! migration table. Versions outside the supported range are rejected, never
//! coerced.

use crate::document::{CURRENT_FILE_VERSION, MIN_FILE_VERSION};
use crate::error::DocumentError;
use regex::Regex;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::OnceLock;
use tracing::{debug, info};

/// Parsed `major.minor` document version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileVersion {
    pub major: u32,
    pub minor: u32,
}

impl FileVersion {
    pub fn parse(raw: &str) -> Result<Self, DocumentError> {
        let invalid = || DocumentError::InvalidVersion(raw.to_string());
        let (major, minor) = raw.split_once('.').ok_or_else(invalid)?;
        Ok(Self {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }

    /// Matches `CURRENT_FILE_VERSION`.
    pub const CURRENT: FileVersion = FileVersion { major: 2, minor: 4 };

    /// Matches `MIN_FILE_VERSION`.
    pub const MINIMUM: FileVersion = FileVersion { major: 2, minor: 0 };
}

impl fmt::Display for FileVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Per-version migration rules.
struct Migration {
    /// Maps are nested under `mapping.connections` rather than `maps`.
    grouped: bool,
    /// Legacy key names for the source and destination lists.
    endpoint_keys: Option<(&'static str, &'static str)>,
    /// `mute` (0/1) instead of `muted`, plus optional `mode` and legacy tokens.
    legacy_properties: bool,
    /// Predates `scope` and the other transport properties.
    pre_scope: bool,
}

fn migration_for(version: FileVersion) -> Migration {
    match (version.major, version.minor) {
        (2, 0) | (2, 1) => Migration {
            grouped: true,
            endpoint_keys: Some(("source", "destination")),
            legacy_properties: true,
            pre_scope: true,
        },
        (2, 2) => Migration {
            grouped: false,
            endpoint_keys: Some(("src", "dest")),
            legacy_properties: true,
            pre_scope: false,
        },
        _ => Migration {
            grouped: false,
            endpoint_keys: None,
            legacy_properties: false,
            pre_scope: false,
        },
    }
}

/// Ordered legacy identifier rewrites. Destination spellings come first so a
/// rewritten source token can never be mistaken for a destination one.
const DESTINATION_REWRITES: &[(&str, &str)] = &[(r"\bdst\[\d+\]", "y"), (r"\bdst\b", "y")];
const SOURCE_REWRITES: &[(&str, &str)] = &[
    (r"\bsrc\[(\d+)\]", "x$$${1}"),
    (r"\bs\[(\d+)\]", "x$$${1}"),
    (r"\bsrc\b", "x"),
];

fn legacy_rewrites() -> &'static [(Regex, &'static str)] {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        DESTINATION_REWRITES
            .iter()
            .chain(SOURCE_REWRITES.iter())
            .map(|(pattern, replacement)| {
                (
                    Regex::new(pattern).expect("legacy rewrite patterns are valid"),
                    *replacement,
                )
            })
            .collect()
    })
}

/// Rewrite legacy source/destination identifiers into `x$N` / `y`.
pub fn rewrite_legacy_expression(expression: &str) -> String {
    legacy_rewrites()
        .iter()
        .fold(expression.to_string(), |expr, (re, replacement)| {
            re.replace_all(&expr, *replacement).into_owned()
        })
}

/// Upgrade a parsed document to the current version.
///
/// Current-version input is returned unchanged.
pub fn upgrade(mut document: Value) -> Result<Value, DocumentError> {
    let raw_version = document
        .get("fileversion")
        .and_then(Value::as_str)
        .ok_or_else(|| DocumentError::Malformed("missing string field `fileversion`".to_string()))?
        .to_string();

    if raw_version == CURRENT_FILE_VERSION {
        return Ok(document);
    }

    let version = FileVersion::parse(&raw_version)?;
    let (min, max) = (FileVersion::MINIMUM, FileVersion::CURRENT);
    if version < min || version > max {
        return Err(DocumentError::UnsupportedVersion {
            found: raw_version,
            min: min.to_string(),
            max: max.to_string(),
        });
    }

    let migration = migration_for(version);
    let root = document
        .as_object_mut()
        .ok_or_else(|| DocumentError::Malformed("document is not an object".to_string()))?;

    let mut maps = if migration.grouped {
        take_grouped_maps(root)?
    } else {
        match root.remove("maps") {
            Some(Value::Array(maps)) => maps,
            Some(_) => return Err(DocumentError::Malformed("`maps` is not an array".to_string())),
            None => Vec::new(),
        }
    };

    for map in maps.iter_mut() {
        let map = map
            .as_object_mut()
            .ok_or_else(|| DocumentError::Malformed("map entry is not an object".to_string()))?;
        migrate_map(map, &migration);
    }

    root.remove("mapping");
    root.insert("maps".to_string(), Value::Array(maps));
    root.insert(
        "fileversion".to_string(),
        Value::String(CURRENT_FILE_VERSION.to_string()),
    );
    info!(from = %version, to = CURRENT_FILE_VERSION, "Upgraded legacy session document");
    Ok(document)
}

fn take_grouped_maps(root: &mut Map<String, Value>) -> Result<Vec<Value>, DocumentError> {
    let connections = root
        .get_mut("mapping")
        .and_then(Value::as_object_mut)
        .and_then(|mapping| mapping.remove("connections"));
    match connections {
        Some(Value::Array(maps)) => Ok(maps),
        Some(_) => Err(DocumentError::Malformed(
            "`mapping.connections` is not an array".to_string(),
        )),
        None => Ok(Vec::new()),
    }
}

fn as_endpoint_list(value: Value) -> Value {
    match value {
        Value::String(s) => Value::Array(vec![Value::String(s)]),
        other => other,
    }
}

fn migrate_map(map: &mut Map<String, Value>, migration: &Migration) {
    if let Some((source_key, destination_key)) = migration.endpoint_keys {
        if let Some(sources) = map.remove(source_key) {
            map.insert("sources".to_string(), as_endpoint_list(sources));
        }
        if let Some(destinations) = map.remove(destination_key) {
            map.insert("destinations".to_string(), as_endpoint_list(destinations));
        }
    }

    if migration.legacy_properties {
        if let Some(mute) = map.remove("mute") {
            let muted = match mute {
                Value::Bool(b) => b,
                Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
                _ => false,
            };
            map.insert("muted".to_string(), Value::Bool(muted));
        }

        if let Some(Value::String(expr)) = map.get("expression") {
            let rewritten = rewrite_legacy_expression(expr);
            debug!(from = %expr, to = %rewritten, "Rewrote legacy expression");
            map.insert("expression".to_string(), Value::String(rewritten));
        }

        if let Some(Value::String(mode)) = map.remove("mode") {
            match mode.as_str() {
                "reverse" => {
                    map.insert("expression".to_string(), Value::String("y=x".to_string()));
                    let sources = map.remove("sources");
                    let destinations = map.remove("destinations");
                    if let Some(d) = destinations {
                        map.insert("sources".to_string(), d);
                    }
                    if let Some(s) = sources {
                        map.insert("destinations".to_string(), s);
                    }
                }
                "linear" => {
                    map.insert(
                        "expression".to_string(),
                        Value::String("y=linear(x,-,-,-,-)".to_string()),
                    );
                }
                "bypass" => {
                    map.insert("expression".to_string(), Value::String("y=x".to_string()));
                }
                _ => {}
            }
        }
    }

    if migration.pre_scope {
        let defaults = [
            ("process_loc", Value::String("SOURCE".to_string())),
            ("protocol", Value::String("UDP".to_string())),
            ("use_inst", Value::Bool(false)),
            ("version", Value::from(0)),
        ];
        for (key, value) in defaults {
            map.entry(key.to_string()).or_insert(value);
        }
    }

    map.entry("expression".to_string())
        .or_insert_with(|| Value::String("y=x".to_string()));
}
