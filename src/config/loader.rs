//! Configuration loading: sources in precedence order, then deserialize and validate.

use super::merge::merge_policy;
use super::sources::{global_file, workspace_file};
use super::SessionConfig;
use crate::error::SessionError;
use config::{File, FileFormat};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Builds a [`SessionConfig`] from layered sources.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Defaults, global file, `<workspace_root>/mapsession.toml`, environment.
    pub fn load(workspace_root: &Path) -> Result<SessionConfig, SessionError> {
        Self::load_layered(workspace_root, global_file::global_config_path().as_deref())
    }

    /// Like [`ConfigLoader::load`] with an explicit global file path.
    pub fn load_layered(
        workspace_root: &Path,
        global: Option<&Path>,
    ) -> Result<SessionConfig, SessionError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder, global)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root)?;
        let config: SessionConfig = builder
            .add_source(merge_policy::environment())
            .build()?
            .try_deserialize()?;
        config.validate()?;
        debug!(workspace = %workspace_root.display(), "Loaded configuration");
        Ok(config)
    }

    /// Defaults, one explicit file, environment. The file must exist.
    pub fn load_from_file(path: &Path) -> Result<SessionConfig, SessionError> {
        if !path.exists() {
            return Err(SessionError::ConfigError(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let config: SessionConfig = merge_policy::builder_with_defaults()?
            .add_source(File::from(path).format(FileFormat::Toml))
            .add_source(merge_policy::environment())
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn global_config_path() -> Option<PathBuf> {
        global_file::global_config_path()
    }
}
