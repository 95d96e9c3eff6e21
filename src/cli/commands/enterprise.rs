//! `enterprise`: wrap installers into an enterprise MSI.

use crate::bundler::process::SystemRunner;
use crate::bundler::{BuildSettings, EnterpriseInstaller, ErrorExt};
use crate::cli::retry_config::RetryConfig;
use crate::cli::{Command, RuntimeConfig};
use crate::error::{CliError, Result};
use crate::version::load_version_file;
use std::time::Duration;

pub(super) fn execute_enterprise(command: &Command, config: &RuntimeConfig) -> Result<()> {
    let Command::Enterprise {
        config: settings_path,
        version_file,
        output,
        unofficial,
    } = command
    else {
        return Err(CliError::InvalidArguments {
            reason: "expected the enterprise command".to_string(),
        }
        .into());
    };

    let mut settings = BuildSettings::load(settings_path)?;
    RetryConfig::from_env(&settings.signing).apply(&mut settings.signing);
    if let Some(version_file) = version_file {
        settings.enterprise.product_version = load_version_file(version_file)?.to_string();
    }

    let runner = SystemRunner::with_timeout(Duration::from_secs(settings.signing.timeout_secs));
    let installer = EnterpriseInstaller::new(&settings.enterprise, &settings.signing, &runner);

    let out = config.output();
    let _ = out.info(&format!(
        "Building {} {}",
        settings.enterprise.product_name, settings.enterprise.product_version
    ));
    let _ = out.verbose(&format!("Product code: {}", installer.product_code()));
    let _ = out.verbose(&format!("Upgrade code: {}", installer.upgrade_code()));

    std::fs::create_dir_all(output).fs_context("creating output directory", output)?;
    let work_dir = tempfile::Builder::new()
        .prefix(".omaha-msi-")
        .tempdir_in(output)
        .fs_context("creating work directory", output)?;
    let artifact = installer.build(work_dir.path(), output, !unofficial)?;

    if config.is_json() {
        return super::print_json(config, &artifact);
    }
    let _ = out.success(&format!("{} ({} bytes)", artifact.path.display(), artifact.size));
    let _ = out.indent(&format!("sha256 {}", artifact.checksum));
    if !artifact.signed {
        let _ = out.warn(&format!("{} is unsigned", artifact.name));
    }
    Ok(())
}
