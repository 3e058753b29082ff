//! CLI command-name contract used in log records.

use crate::cli::parse::Operation;

/// Stable operation name (e.g. "load", "print_session_tags").
pub fn operation_name(operation: &Operation) -> &'static str {
    match operation {
        Operation::Save { .. } => "save",
        Operation::Load { .. } => "load",
        Operation::Unload { .. } => "unload",
        Operation::Clear { .. } => "clear",
        Operation::Tags => "print_session_tags",
        Operation::Interactive => "interactive",
        Operation::PrintConfig => "print_config",
    }
}
