//! Configuration System
//!
//! Layered configuration: built-in defaults, the global config file, the
//! workspace config file, then `MAPSESSION__SECTION__KEY` environment
//! variables. CLI flags are applied on top by the binary.

use crate::error::SessionError;
use crate::reconciler::ReconcilerConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use crate::logging::LoggingConfig;

mod loader;
mod merge;
mod sources;

pub use loader::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub reconciler: ReconcilerSettings,

    #[serde(default)]
    pub graph: GraphSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Supervision tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcilerSettings {
    /// Graph poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Creation passes before a resolvable spec is abandoned
    #[serde(default = "default_max_create_attempts")]
    pub max_create_attempts: u32,

    /// Name of the management device registered in interactive mode
    #[serde(default = "default_management_device")]
    pub management_device: String,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_create_attempts() -> u32 {
    3
}

fn default_management_device() -> String {
    "mapsession".to_string()
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_create_attempts: default_max_create_attempts(),
            management_device: default_management_device(),
        }
    }
}

impl ReconcilerSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than zero".to_string());
        }
        if self.max_create_attempts == 0 {
            return Err("max_create_attempts must be greater than zero".to_string());
        }
        if self.management_device.trim().is_empty() {
            return Err("management_device cannot be empty".to_string());
        }
        Ok(())
    }

    pub fn to_reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_create_attempts: self.max_create_attempts,
            management_device: self.management_device.clone(),
        }
    }
}

/// Graph backing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSettings {
    /// JSON file holding the local network description between runs
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

impl SessionConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), SessionError> {
        self.reconciler
            .validate()
            .map_err(|e| SessionError::ConfigError(format!("reconciler: {}", e)))?;
        if let Some(path) = &self.graph.state_file {
            if path.as_os_str().is_empty() {
                return Err(SessionError::ConfigError(
                    "graph: state_file cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Render as TOML, in the same shape the config files use.
    pub fn to_toml(&self) -> Result<String, SessionError> {
        toml::to_string_pretty(self)
            .map_err(|e| SessionError::ConfigError(format!("Failed to render config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.reconciler.poll_interval_ms, 1000);
        assert_eq!(config.reconciler.max_create_attempts, 3);
        assert_eq!(config.reconciler.management_device, "mapsession");
        assert!(config.graph.state_file.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_interval_and_attempts() {
        let mut config = SessionConfig::default();
        config.reconciler.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = SessionConfig::default();
        config.reconciler.max_create_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = SessionConfig::default();
        config.reconciler.management_device = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reconciler_config_conversion() {
        let settings = ReconcilerSettings {
            poll_interval_ms: 250,
            ..ReconcilerSettings::default()
        };
        let config = settings.to_reconciler_config();
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.max_create_attempts, 3);
    }

    #[test]
    fn test_toml_rendering_round_trips() {
        let mut config = SessionConfig::default();
        config.graph.state_file = Some(PathBuf::from("graph.json"));
        let rendered = config.to_toml().unwrap();
        let parsed: SessionConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
