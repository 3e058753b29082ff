//! CLI domain: parse, route, help and output only.
//! No domain orchestration; a single route table dispatches to the library.

mod help;
mod output;
mod parse;
mod route;

pub use help::operation_name;
pub use output::map_error;
pub use parse::{Cli, Operation};
pub use route::RunContext;
