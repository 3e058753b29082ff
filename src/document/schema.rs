//! Bundled JSON schema for current-version session documents.

use crate::error::DocumentError;
use jsonschema::{Draft, JSONSchema};
use serde_json::Value;

const SESSION_SCHEMA: &str = include_str!("../../schema/session.schema.json");

/// Compiled session schema (Draft 7).
pub struct SchemaValidator {
    compiled: JSONSchema,
}

impl SchemaValidator {
    /// Compile the schema shipped with the crate.
    pub fn bundled() -> Result<Self, DocumentError> {
        let schema: Value = serde_json::from_str(SESSION_SCHEMA)?;
        Self::from_schema(&schema)
    }

    pub fn from_schema(schema: &Value) -> Result<Self, DocumentError> {
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(schema)
            .map_err(|e| DocumentError::Malformed(format!("Failed to compile schema: {}", e)))?;
        Ok(Self { compiled })
    }

    /// Pass/fail check. All violations are collected into the error.
    pub fn validate(&self, document: &Value) -> Result<(), DocumentError> {
        if let Err(errors) = self.compiled.validate(document) {
            let messages: Vec<String> = errors
                .map(|e| format!("{} at {}", e, e.instance_path))
                .collect();
            return Err(DocumentError::SchemaInvalid(messages));
        }
        tracing::debug!("Session document passed schema validation");
        Ok(())
    }
}
