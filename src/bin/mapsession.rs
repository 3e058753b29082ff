//! mapsession CLI Binary
//!
//! Command-line interface for saving, loading and supervising sessions.

use anyhow::Context;
use clap::Parser;
use mapsession::cli::{map_error, Cli, RunContext};
use mapsession::config::{ConfigLoader, SessionConfig};
use mapsession::logging::{init_logging, LoggingConfig};
use mapsession::shutdown::ShutdownFlag;
use std::process;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{:#}", e);
            process::exit(2);
        }
    };

    let logging_config = build_logging_config(&cli, &config);
    if let Err(e) = init_logging(Some(&logging_config)) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    info!("mapsession starting");

    let operation = match cli.operation() {
        Ok(operation) => operation,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(2);
        }
    };

    let shutdown = ShutdownFlag::new();
    shutdown.install_signal_handlers();

    let context = match RunContext::new(config, shutdown) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("Error opening graph: {}", e);
            eprintln!("{}", map_error(&e));
            process::exit(1);
        }
    };

    match context.execute(&operation).await {
        Ok(output) => {
            info!("Operation completed successfully");
            if !output.is_empty() {
                println!("{}", output);
            }
        }
        Err(e) => {
            error!("Operation failed: {}", e);
            eprintln!("{}", map_error(&e));
            process::exit(1);
        }
    }
}

/// Effective configuration: explicit file or layered discovery, then the
/// CLI's graph override.
fn load_config(cli: &Cli) -> anyhow::Result<SessionConfig> {
    let mut config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ConfigLoader::load(&cli.workspace).context("Failed to load configuration")?,
    };
    if let Some(state) = &cli.graph_state {
        config.graph.state_file = Some(state.clone());
    }
    config.validate()?;
    Ok(config)
}

/// Build logging configuration from CLI args and the config file.
/// Precedence: CLI flags override config file override defaults.
fn build_logging_config(cli: &Cli, config: &SessionConfig) -> LoggingConfig {
    let mut logging = config.logging.clone();

    if cli.quiet {
        logging.level = "off".to_string();
    }
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    if let Some(ref level) = cli.log_level {
        logging.level = level.clone();
    }
    if let Some(ref format) = cli.log_format {
        logging.format = format.clone();
    }
    if let Some(ref output) = cli.log_output {
        logging.output = output.clone();
    }
    if let Some(ref file) = cli.log_file {
        logging.file = file.clone();
    }
    logging
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_build_logging_config_default() {
        let cli = parse(&["mapsession", "--print_session_tags"]);
        let config = build_logging_config(&cli, &SessionConfig::default());
        assert_eq!(config.level, "info", "default level should be info");
        assert_eq!(config.output, "stderr", "default output should be stderr");
    }

    #[test]
    fn test_build_logging_config_quiet() {
        let cli = parse(&["mapsession", "--quiet", "--print_session_tags"]);
        let config = build_logging_config(&cli, &SessionConfig::default());
        assert_eq!(config.level, "off", "quiet should disable logging");
    }

    #[test]
    fn test_build_logging_config_explicit_level_wins_over_verbose() {
        let cli = parse(&[
            "mapsession",
            "--verbose",
            "--log-level",
            "trace",
            "--log-output",
            "file",
            "--clear",
        ]);
        let config = build_logging_config(&cli, &SessionConfig::default());
        assert_eq!(config.level, "trace");
        assert_eq!(config.output, "file");
    }

    #[test]
    fn test_graph_state_flag_overrides_config() {
        let temp = tempfile::tempdir().unwrap();
        let config_path = temp.path().join("mapsession.toml");
        std::fs::write(&config_path, "[graph]\nstate_file = \"a.json\"\n").unwrap();
        let cli = parse(&[
            "mapsession",
            "--config",
            config_path.to_str().unwrap(),
            "--graph-state",
            "b.json",
            "--clear",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.graph.state_file, Some(std::path::PathBuf::from("b.json")));
    }
}
