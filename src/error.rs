//! Error types for the session reconciliation system.

use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by the graph collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Unknown signal handle: {0}")]
    UnknownSignal(u64),

    #[error("Unknown device handle: {0}")]
    UnknownDevice(u64),

    #[error("Unknown connection handle: {0}")]
    UnknownMap(u64),

    #[error("Connection rejected: {0}")]
    Rejected(String),

    #[error("Graph has been freed")]
    Freed,

    #[error("Graph state error: {0}")]
    State(String),
}

/// Session document errors: parsing, validation and version handling.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Malformed session document: {0}")]
    Malformed(String),

    #[error("Session document failed schema validation:\n{}", .0.join("\n"))]
    SchemaInvalid(Vec<String>),

    #[error("Invalid file version: {0:?}")]
    InvalidVersion(String),

    #[error("Unsupported file version {found} (supported: {min} to {max})")]
    UnsupportedVersion {
        found: String,
        min: String,
        max: String,
    },

    #[error("Invalid endpoint pattern: {0:?} (expected \"device/signal\")")]
    InvalidPattern(String),

    #[error("Connection spec has no {0}")]
    MissingEndpoints(&'static str),

    #[error("Expression {0:?} has a source reference without an index")]
    UnindexedSource(String),

    #[error("Expression {expression:?} references x${index} but only {sources} source(s) are declared")]
    SourceIndexOutOfRange {
        expression: String,
        index: usize,
        sources: usize,
    },
}

/// Top-level error for session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("{0}")]
    Document(#[from] DocumentError),

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Reconciler is shut down")]
    ShutDown,
}

impl SessionError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SessionError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<config::ConfigError> for SessionError {
    fn from(err: config::ConfigError) -> Self {
        SessionError::ConfigError(err.to_string())
    }
}

impl From<serde_json::Error> for DocumentError {
    fn from(err: serde_json::Error) -> Self {
        DocumentError::Malformed(err.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Document(DocumentError::from(err))
    }
}
