//! Command line interface for omaha_packager.
//!
//! Parses arguments, dispatches to the command implementations and turns
//! failures into exit code 1 with the failing stage and recovery
//! suggestions.

mod args;
pub mod commands;
mod output;
pub mod retry_config;

pub use args::{Args, Command, ModeArg, RuntimeConfig};
pub use commands::execute_command;
pub use output::OutputManager;

use crate::error::Result;

/// Main CLI entry point
pub async fn run() -> Result<i32> {
    let args = Args::parse_args();
    execute_command(args).await
}
