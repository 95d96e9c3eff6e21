//! Code signing through an external signing utility.
//!
//! The signer always copies its input to the output path first and signs
//! the copy in place. Timestamp servers are flaky, so each signing pass is
//! retried a fixed number of times with a fixed delay; no other stage
//! retries.

use crate::bundler::error::ErrorExt;
use crate::bundler::process::{ProcessRunner, ToolCommand};
use crate::bundler::settings::SigningSettings;
use crate::bundler::Result;
use std::path::Path;
use std::time::Duration;

/// Signs a binary.
pub trait Signer: Send + Sync {
    /// Writes a signed copy of `input` to `output`.
    ///
    /// Returns whether a signature was applied.
    fn sign(&self, input: &Path, output: &Path) -> Result<bool>;
}

/// Runs `operation` up to `attempts` times, sleeping `backoff` between
/// failed attempts. Only process failures are retried.
pub fn with_fixed_retry<T>(
    attempts: u32,
    backoff: Duration,
    what: &str,
    mut operation: impl FnMut() -> Result<T>,
) -> Result<T> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_process_failure() && attempt < attempts => {
                log::warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {}s",
                    what,
                    attempt,
                    attempts,
                    e,
                    backoff.as_secs()
                );
                std::thread::sleep(backoff);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// `signtool`-compatible signer.
pub struct SignTool<'a> {
    runner: &'a dyn ProcessRunner,
    settings: SigningSettings,
}

impl<'a> SignTool<'a> {
    /// Signer using `settings`.
    pub fn new(runner: &'a dyn ProcessRunner, settings: SigningSettings) -> Self {
        Self { runner, settings }
    }

    fn certificate_args(&self, mut cmd: ToolCommand) -> ToolCommand {
        let s = &self.settings;
        if let Some(cert) = &s.certificate {
            cmd = cmd.arg("/f").path_arg(cert);
        }
        if let Some(password) = &s.password {
            cmd = cmd.args(["/p", password.as_str()]);
        }
        if let Some(store) = &s.store {
            cmd = cmd.args(["/s", store.as_str()]);
        }
        if let Some(name) = &s.subject_name {
            cmd = cmd.args(["/n", name.as_str()]);
        }
        if let Some(hash) = &s.sha1_hash {
            cmd = cmd.args(["/sha1", hash.as_str()]);
        }
        cmd
    }

    /// Command lines for each signing pass over `target`, in order.
    pub fn commands(&self, target: &Path) -> Vec<ToolCommand> {
        let base = || ToolCommand::new(&self.settings.tool).arg("sign");

        let sha1 = self
            .certificate_args(base().args(["/fd", "sha1"]))
            .args(["/t", self.settings.timestamp_url.as_str()])
            .path_arg(target);
        if !self.settings.dual_sign {
            return vec![sha1];
        }

        let sha256 = self
            .certificate_args(base())
            .args(["/tr", self.settings.timestamp_url.as_str()])
            .args(["/td", "SHA256", "/as", "/fd", "SHA256"])
            .path_arg(target);
        vec![sha1, sha256]
    }
}

impl Signer for SignTool<'_> {
    fn sign(&self, input: &Path, output: &Path) -> Result<bool> {
        if input != output {
            std::fs::copy(input, output).fs_context("copying binary for signing", output)?;
        }
        if !self.settings.is_configured() {
            log::warn!(
                "No signing certificate configured, {} is unsigned",
                output.display()
            );
            return Ok(false);
        }

        for command in self.commands(output) {
            with_fixed_retry(
                self.settings.attempts,
                self.settings.backoff(),
                &format!("signing {}", output.display()),
                || self.runner.run(&command).map(|_| ()),
            )?;
        }
        log::info!("Signed {}", output.display());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::process::testing::RecordingRunner;
    use std::path::PathBuf;
    use crate::bundler::Error;
    use std::cell::Cell;

    fn configured() -> SigningSettings {
        SigningSettings {
            certificate: Some(PathBuf::from("release.pfx")),
            password: Some("secret".into()),
            attempts: 3,
            backoff_secs: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_single_sign_command() {
        let runner = RecordingRunner::default();
        let tool = SignTool::new(&runner, configured());
        let commands = tool.commands(Path::new("setup.exe"));
        assert_eq!(commands.len(), 1);
        assert_eq!(
            commands[0].display(),
            "signtool sign /fd sha1 /f release.pfx /p secret /t http://timestamp.digicert.com setup.exe"
        );
    }

    #[test]
    fn test_dual_sign_appends_sha256_pass() {
        let runner = RecordingRunner::default();
        let tool = SignTool::new(
            &runner,
            SigningSettings {
                dual_sign: true,
                ..configured()
            },
        );
        let commands = tool.commands(Path::new("setup.exe"));
        assert_eq!(commands.len(), 2);
        let second = commands[1].display();
        assert!(second.contains("/tr http://timestamp.digicert.com /td SHA256 /as /fd SHA256"));
        assert!(second.ends_with("setup.exe"));
    }

    #[test]
    fn test_unconfigured_signer_copies_only() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("setup_unsigned.exe");
        let output = dir.path().join("setup.exe");
        std::fs::write(&input, b"MZ").unwrap();
        let runner = RecordingRunner::default();

        let signed = SignTool::new(&runner, SigningSettings::default())
            .sign(&input, &output)
            .unwrap();
        assert!(!signed);
        assert_eq!(std::fs::read(&output).unwrap(), b"MZ");
        assert!(runner.commands.lock().unwrap().is_empty());
    }

    #[test]
    fn test_failing_signer_retries_fixed_count() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("setup_unsigned.exe");
        std::fs::write(&input, b"MZ").unwrap();
        let runner = RecordingRunner {
            fail_with: Some(1),
            ..Default::default()
        };

        let err = SignTool::new(&runner, configured())
            .sign(&input, &dir.path().join("setup.exe"))
            .unwrap_err();
        assert!(err.is_process_failure());
        assert_eq!(runner.commands.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_retry_stops_on_non_process_error() {
        let calls = Cell::new(0);
        let result: Result<()> = with_fixed_retry(5, Duration::ZERO, "op", || {
            calls.set(calls.get() + 1);
            Err(Error::GenericError("bad input".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
