//! Command execution.
//!
//! Every command returns `Ok(())` on success. Failures are reported once,
//! here, with the failing stage, the value it was processing and recovery
//! suggestions, and map to exit code 1.

mod build;
mod enterprise;
mod identifier;
mod inspect;
mod resolve;
mod tag;

use crate::cli::{Args, Command, RuntimeConfig};
use crate::error::{PackagerError, Result};

use build::execute_build;
use enterprise::execute_enterprise;
use identifier::{execute_guid, execute_msi_version};
use inspect::{execute_extract_tag, execute_inspect};
use resolve::execute_resolve;
use tag::execute_tag;

/// Execute the command named by `args`, returning the process exit code.
pub async fn execute_command(args: Args) -> Result<i32> {
    if let Err(validation_error) = args.validate() {
        let output = super::OutputManager::new(false, false);
        output.error(&format!("Invalid arguments: {}", validation_error));
        return Ok(1);
    }

    let config = RuntimeConfig::from(&args);

    let result = match &args.command {
        Command::Build { .. } => execute_build(&args.command, &config).await,
        Command::Resolve { .. } => execute_resolve(&args.command, &config),
        Command::Tag { .. } => execute_tag(&args.command, &config).await,
        Command::ExtractTag { .. } => execute_extract_tag(&args.command, &config),
        Command::Inspect { .. } => execute_inspect(&args.command, &config),
        Command::Guid { .. } => execute_guid(&args.command, &config),
        Command::MsiVersion { .. } => execute_msi_version(&args.command, &config),
        Command::Enterprise { .. } => execute_enterprise(&args.command, &config),
    };

    match result {
        Ok(()) => Ok(0),
        Err(e) => {
            report_failure(&config, args.command.name(), &e);
            Ok(1)
        }
    }
}

/// Prints a failed command with its stage and recovery suggestions.
pub(crate) fn report_failure(config: &RuntimeConfig, command: &str, error: &PackagerError) {
    let output = config.output();
    match error {
        PackagerError::Bundler(e) if e.stage().is_some() => {
            let stage = e.stage().map(|s| s.as_str()).unwrap_or_default();
            output.error(&format!("Command '{command}' failed in stage '{stage}': {e}"));
        }
        _ => output.error(&format!("Command '{command}' failed: {error}")),
    }

    let suggestions = error.recovery_suggestions();
    if !suggestions.is_empty() {
        output.error_detail("Recovery suggestions:");
        for suggestion in suggestions {
            output.error_detail(&format!("  • {suggestion}"));
        }
    }
}

/// Prints `value` as pretty JSON.
pub(crate) fn print_json<T: serde::Serialize>(config: &RuntimeConfig, value: &T) -> Result<()> {
    let _ = config.output().println(&serde_json::to_string_pretty(value)?);
    Ok(())
}
