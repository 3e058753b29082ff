//! CLI parse: clap types for mapsession. No behavior beyond flag interpretation.

use crate::persistence::Wait;
use crate::resolver::DeviceOverrides;
use clap::{ArgGroup, Parser};
use std::path::PathBuf;
use std::time::Duration;

/// mapsession CLI - save, load and supervise signal-routing sessions
#[derive(Parser, Debug)]
#[command(name = "mapsession")]
#[command(about = "Save, load and supervise signal-routing sessions")]
#[command(group(
    ArgGroup::new("operation")
        .required(true)
        .multiple(false)
        .args(["save", "load", "unload", "clear", "print_session_tags", "interactive", "print_config"])
))]
pub struct Cli {
    /// Save the current connections as a session file
    #[arg(long, value_name = "PATH")]
    pub save: Option<PathBuf>,

    /// Load one or more session files
    #[arg(long, value_name = "PATH", num_args = 1..)]
    pub load: Vec<PathBuf>,

    /// Unload sessions by file path or tag
    #[arg(long, value_name = "PATH", num_args = 1..)]
    pub unload: Vec<String>,

    /// Remove every connection, or only those of --tag
    #[arg(long)]
    pub clear: bool,

    /// Print the tags of all loaded sessions
    #[arg(long = "print_session_tags")]
    pub print_session_tags: bool,

    /// Serve load/unload requests until interrupted
    #[arg(long)]
    pub interactive: bool,

    /// Print the effective configuration
    #[arg(long)]
    pub print_config: bool,

    /// Stage missing endpoints; optionally give up after SECONDS
    #[arg(long, value_name = "SECONDS", num_args = 0..=1)]
    pub wait: Option<Option<f64>>,

    /// Keep loaded connections supervised and re-create them when they vanish
    #[arg(long)]
    pub persist: bool,

    /// Session description, used when saving
    #[arg(long, default_value = "")]
    pub description: String,

    /// Session tag (defaults to the file stem when loading)
    #[arg(long)]
    pub tag: Option<String>,

    /// Map a logical device name to a live one when loading (LOGICAL=LIVE)
    #[arg(long = "device-map", value_name = "LOGICAL=LIVE", value_parser = parse_device_mapping)]
    pub device_map: Vec<(String, String)>,

    /// Workspace root directory (for mapsession.toml)
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Graph state file (overrides graph.state_file)
    #[arg(long = "graph-state", value_name = "PATH")]
    pub graph_state: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long)]
    pub verbose: bool,

    /// Disable logging
    #[arg(long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

fn parse_device_mapping(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((logical, live)) if !logical.is_empty() && !live.is_empty() => {
            Ok((logical.to_string(), live.to_string()))
        }
        _ => Err(format!("expected LOGICAL=LIVE, got {:?}", raw)),
    }
}

/// The single core operation an invocation performs.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Save {
        path: PathBuf,
        description: String,
        tag: Option<String>,
    },
    Load {
        paths: Vec<PathBuf>,
        tag: Option<String>,
        wait: Wait,
        persist: bool,
        overrides: Option<DeviceOverrides>,
    },
    Unload {
        targets: Vec<String>,
    },
    Clear {
        tag: Option<String>,
    },
    Tags,
    Interactive,
    PrintConfig,
}

impl Cli {
    /// Interpret the flags as one operation.
    pub fn operation(&self) -> Result<Operation, String> {
        if let Some(path) = &self.save {
            return Ok(Operation::Save {
                path: path.clone(),
                description: self.description.clone(),
                tag: self.tag.clone(),
            });
        }
        if !self.load.is_empty() {
            let overrides = if self.device_map.is_empty() {
                None
            } else {
                Some(self.device_map.iter().cloned().collect())
            };
            return Ok(Operation::Load {
                paths: self.load.clone(),
                tag: self.tag.clone(),
                wait: self.wait_mode()?,
                persist: self.persist,
                overrides,
            });
        }
        if !self.unload.is_empty() {
            return Ok(Operation::Unload {
                targets: self.unload.clone(),
            });
        }
        if self.clear {
            return Ok(Operation::Clear {
                tag: self.tag.clone(),
            });
        }
        if self.print_session_tags {
            return Ok(Operation::Tags);
        }
        if self.interactive {
            return Ok(Operation::Interactive);
        }
        if self.print_config {
            return Ok(Operation::PrintConfig);
        }
        Err("Nothing to do: use --save, --load, --unload, --clear, --print_session_tags or --interactive".to_string())
    }

    fn wait_mode(&self) -> Result<Wait, String> {
        match self.wait {
            None => Ok(Wait::No),
            Some(None) => Ok(Wait::Forever),
            Some(Some(seconds)) => Duration::try_from_secs_f64(seconds)
                .map(Wait::For)
                .map_err(|_| format!("invalid --wait duration: {}", seconds)),
        }
    }
}
