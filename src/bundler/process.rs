//! Boundary to external tools.
//!
//! Compilers, linkers, signers and external compressors are opaque
//! processes with a file-in/file-out contract: a [`ToolCommand`] names the
//! program and its arguments, a [`ProcessRunner`] executes it, and
//! [`run_tool`] checks that the declared output file exists afterwards.
//! Failures carry the exit code and captured stderr.

use crate::bundler::{Error, Result};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

/// Default timeout for an external tool invocation.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(600);

/// Captured stderr is truncated to this many bytes.
const MAX_STDERR_BYTES: usize = 64 * 1024;

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl ToolCommand {
    /// Starts a command for `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Appends a path argument.
    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy())
    }

    /// Appends `template` arguments with `{name}` placeholders replaced.
    pub fn templated_args(mut self, template: &[String], values: &HashMap<&str, String>) -> Self {
        for arg in template {
            let mut expanded = arg.clone();
            for (name, value) in values {
                expanded = expanded.replace(&format!("{{{name}}}"), value);
            }
            self.args.push(expanded);
        }
        self
    }

    /// Runs the command from `dir`.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Program name.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments, in order.
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Working directory, when set.
    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// Shell-like rendering for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Output of a successful invocation.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// Captured standard output
    pub stdout: Vec<u8>,
    /// Captured standard error
    pub stderr: Vec<u8>,
}

/// Executes tool commands.
pub trait ProcessRunner: Send + Sync {
    /// Runs `command` to completion.
    ///
    /// A non-zero exit is reported as [`Error::Process`].
    fn run(&self, command: &ToolCommand) -> Result<ProcessOutput>;
}

/// Runs commands as child processes with a timeout.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

impl SystemRunner {
    /// Runner that kills tools exceeding `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

fn read_bounded(mut pipe: impl Read, limit: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match pipe.read(&mut chunk) {
            Ok(0) => break,
            Err(e) => {
                log::debug!("stopped reading tool output after {} bytes: {}", buf.len(), e);
                break;
            }
            Ok(n) => {
                let room = limit.saturating_sub(buf.len());
                buf.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
    buf
}

impl ProcessRunner for SystemRunner {
    fn run(&self, command: &ToolCommand) -> Result<ProcessOutput> {
        log::debug!("running: {}", command.display());

        let mut cmd = Command::new(resolve_program(&command.program));
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|error| Error::CommandFailed {
            command: command.display(),
            error,
        })?;

        // Drain both pipes concurrently so a chatty tool cannot block on a full pipe.
        let stdout = child
            .stdout
            .take()
            .map(|pipe| std::thread::spawn(move || read_bounded(pipe, usize::MAX)));
        let stderr = child
            .stderr
            .take()
            .map(|pipe| std::thread::spawn(move || read_bounded(pipe, MAX_STDERR_BYTES)));

        let status = match child.wait_timeout(self.timeout)? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::ProcessTimedOut {
                    program: command.program.clone(),
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };

        let join = |handle: Option<std::thread::JoinHandle<Vec<u8>>>| {
            handle.and_then(|h| h.join().ok()).unwrap_or_default()
        };
        let output = ProcessOutput {
            stdout: join(stdout),
            stderr: join(stderr),
        };

        if !status.success() {
            return Err(Error::Process {
                program: command.program.clone(),
                exit_code: status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

/// Runs `command` and returns `output` once the tool has produced it.
pub fn run_tool(runner: &dyn ProcessRunner, command: &ToolCommand, output: &Path) -> Result<PathBuf> {
    runner.run(command)?;
    if !output.is_file() {
        return Err(Error::Process {
            program: command.program.clone(),
            exit_code: Some(0),
            stderr: format!("expected output {} was not produced", output.display()),
        });
    }
    Ok(output.to_path_buf())
}

/// Resolves `program` on PATH, leaving it unchanged when not found so the
/// spawn error names it.
pub fn resolve_program(program: &str) -> String {
    match which::which(program) {
        Ok(path) => {
            log::debug!("Found {} at: {}", program, path.display());
            path.to_string_lossy().into_owned()
        }
        Err(e) => {
            log::debug!("{} not found in PATH: {}", program, e);
            program.to_string()
        }
    }
}
