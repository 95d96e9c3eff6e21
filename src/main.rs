//! Omaha Packager - build, sign and tag update-client metainstallers.

use omaha_packager::cli;
use omaha_packager::cli::OutputManager;
use std::process;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    match cli::run().await {
        Ok(exit_code) => {
            process::exit(exit_code);
        }
        Err(e) => {
            let output = OutputManager::new(false, false);
            output.error(&format!("Fatal error: {e}"));

            let suggestions = e.recovery_suggestions();
            if !suggestions.is_empty() {
                output.error_detail("Recovery suggestions:");
                for suggestion in suggestions {
                    output.error_detail(&format!("  • {suggestion}"));
                }
            }

            process::exit(1);
        }
    }
}
