//! Merge rules: defaults, override order, conflict handling.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Environment prefix; `MAPSESSION__RECONCILER__POLL_INTERVAL_MS` sets
/// `reconciler.poll_interval_ms`.
pub const ENV_PREFIX: &str = "MAPSESSION";
pub const ENV_SEPARATOR: &str = "__";

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("reconciler.poll_interval_ms", 1000_i64)?
        .set_default("reconciler.max_create_attempts", 3_i64)?
        .set_default("reconciler.management_device", "mapsession")?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("logging.output", "stderr")
}

/// Environment variables override every file source.
pub fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
}
