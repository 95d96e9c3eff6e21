//! `build`: assemble, sign and publish metainstallers.

use crate::bundler::{BuildRequest, BuildSettings, Bundler};
use crate::cli::retry_config::RetryConfig;
use crate::cli::{Command, RuntimeConfig};
use crate::error::{CliError, PackagerError, Result};
use crate::version::load_version_file;
use std::sync::Arc;

pub(super) async fn execute_build(command: &Command, config: &RuntimeConfig) -> Result<()> {
    let Command::Build {
        version_file,
        config: settings_path,
        output,
        prefix,
        mode,
        test_delta,
    } = command
    else {
        return Err(CliError::InvalidArguments {
            reason: "expected the build command".to_string(),
        }
        .into());
    };

    let mut settings = BuildSettings::load(settings_path)?;
    RetryConfig::from_env(&settings.signing).apply(&mut settings.signing);
    let version = load_version_file(version_file)?;
    let mode = mode.build_mode(*test_delta);

    let out = config.output();
    let _ = out.info(&format!("Building {} ({:?})", version, mode));
    let _ = out.verbose(&format!("Settings: {}", settings_path.display()));
    let _ = out.verbose(&format!(
        "Signing: {} attempt(s), {}s backoff",
        settings.signing.attempts, settings.signing.backoff_secs
    ));

    let requests: Vec<BuildRequest> = prefix
        .iter()
        .map(|prefix| BuildRequest {
            version: version.clone(),
            prefix: prefix.clone(),
            mode,
            output_dir: output.clone(),
        })
        .collect();

    let bundler = Arc::new(Bundler::new(settings)?);
    let results = bundler.build_all(requests).await;

    let mut artifacts = Vec::new();
    let mut first_error = None;
    for result in results {
        match result {
            Ok(artifact) => {
                let _ = out.success(&format!("{} ({} bytes)", artifact.path.display(), artifact.size));
                let _ = out.indent(&format!("sha256 {}", artifact.checksum));
                if !artifact.signed {
                    let _ = out.warn(&format!("{} is unsigned", artifact.name));
                }
                if let Some(capacity) = artifact.tag_capacity {
                    let _ = out.verbose(&format!("tag region: {capacity} bytes"));
                }
                artifacts.push(artifact);
            }
            Err(e) => {
                let error = PackagerError::from(e);
                if first_error.is_some() {
                    super::report_failure(config, "build", &error);
                } else {
                    first_error = Some(error);
                }
            }
        }
    }

    if config.is_json() {
        super::print_json(config, &artifacts)?;
    }
    match first_error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}
