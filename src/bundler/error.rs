//! Error types for installer assembly.
//!
//! Provides contextual error chaining, filesystem errors that carry the
//! failing path, the external-process failure shape shared by every tool
//! invocation, and stage attribution for the assembly pipeline.
//!
//! # Features
//!
//! - **Context trait**: Add context to errors similar to anyhow
//! - **ErrorExt trait**: Filesystem operations with automatic path context
//! - **bail! macro**: Early return with formatted error messages
//!
//! # Example
//!
//! ```no_run
//! use omaha_packager::bundler::{Context, ErrorExt, Result};
//! use std::path::Path;
//!
//! fn read_stub(path: &Path) -> Result<Vec<u8>> {
//!     let bytes = std::fs::read(path).fs_context("reading stub", path)?;
//!     if bytes.is_empty() {
//!         omaha_packager::bail!("stub {} is empty", path.display());
//!     }
//!     Ok(bytes)
//! }
//! ```

use crate::bundler::context::Stage;
use crate::error::{PayloadError, TagError, VersionError};
use std::{fmt::Display, io, num, path::PathBuf};
use thiserror::Error as DeriveError;

/// Errors returned by the bundler.
#[derive(Debug, DeriveError)]
#[non_exhaustive]
pub enum Error {
    /// Error with context. Created by the [`Context`] trait.
    #[error("{0}: {1}")]
    Context(String, Box<Self>),

    /// A pipeline stage failed.
    ///
    /// `subject` names the triggering value: a version string, filename or
    /// tag length.
    #[error("stage `{stage}` failed for {subject}: {source}")]
    Stage {
        /// Stage that failed
        stage: Stage,
        /// Value the stage was processing
        subject: String,
        /// Underlying error
        source: Box<Self>,
    },

    /// File system error with path context.
    ///
    /// Created by the [`ErrorExt`] trait's `fs_context` method.
    #[error("{context} {path}: {error}")]
    Fs {
        /// Context describing the operation (e.g., "reading stub")
        context: &'static str,
        /// Path that was being accessed
        path: PathBuf,
        /// The underlying I/O error
        error: io::Error,
    },

    /// Child process could not be started.
    #[error("failed to run command {command}: {error}")]
    CommandFailed {
        /// Command that failed to execute
        command: String,
        /// The underlying error
        error: io::Error,
    },

    /// External tool ran and reported failure.
    #[error("{program} exited with {}: {stderr}", exit_code.map_or_else(|| "signal".to_string(), |c| format!("code {c}")))]
    Process {
        /// Program that was invoked
        program: String,
        /// Exit code, `None` when terminated by a signal
        exit_code: Option<i32>,
        /// Captured standard error
        stderr: String,
    },

    /// External tool exceeded its timeout and was killed.
    #[error("{program} timed out after {timeout_secs}s")]
    ProcessTimedOut {
        /// Program that was invoked
        program: String,
        /// Timeout that elapsed
        timeout_secs: u64,
    },

    /// Version descriptor error raised inside the pipeline.
    #[error(transparent)]
    Version(#[from] VersionError),

    /// Payload resolution error raised inside the pipeline.
    #[error(transparent)]
    Payload(#[from] PayloadError),

    /// Tagging error raised inside the pipeline.
    #[error(transparent)]
    Tag(#[from] TagError),

    /// Generic I/O error.
    #[error("{0}")]
    IoError(#[from] io::Error),

    /// Number conversion error (e.g., stream lengths).
    #[error("{0}")]
    ConvertError(#[from] num::TryFromIntError),

    /// Handlebars template rendering error.
    #[error("{0}")]
    HandleBarsError(#[from] handlebars::RenderError),

    /// Handlebars template parsing error.
    #[error("{0}")]
    Template(#[from] handlebars::TemplateError),

    /// JSON serialization/deserialization error.
    #[error("{0}")]
    JsonError(#[from] serde_json::error::Error),

    /// Build settings parsing error.
    #[error("{0}")]
    TomlError(#[from] toml::de::Error),

    /// Temporary file could not be persisted under its final name.
    #[error("{0}")]
    PersistError(#[from] tempfile::PersistError),

    /// A pipeline worker task panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Generic error with custom message.
    #[error("{0}")]
    GenericError(String),
}

impl Error {
    /// Wraps an error with the stage that produced it.
    pub fn in_stage(self, stage: Stage, subject: impl Into<String>) -> Self {
        Error::Stage {
            stage,
            subject: subject.into(),
            source: Box::new(self),
        }
    }

    /// Whether the root cause is an external process failure.
    pub fn is_process_failure(&self) -> bool {
        match self {
            Error::Process { .. } | Error::ProcessTimedOut { .. } | Error::CommandFailed { .. } => true,
            Error::Context(_, inner) | Error::Stage { source: inner, .. } => inner.is_process_failure(),
            _ => false,
        }
    }

    /// The innermost error, below any context and stage wrappers.
    pub fn root(&self) -> &Self {
        match self {
            Error::Context(_, inner) | Error::Stage { source: inner, .. } => inner.root(),
            other => other,
        }
    }

    /// The stage that failed, if the error carries one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Stage { stage, .. } => Some(*stage),
            Error::Context(_, inner) => inner.stage(),
            _ => None,
        }
    }
}

/// Convenient type alias for Result.
pub type Result<T> = std::result::Result<T, Error>;

/// Trait for adding context to errors.
///
/// Similar to `anyhow::Context` but integrated with bundler's Error type.
/// Works with both `Result<T, E>` and `Option<T>`.
pub trait Context<T> {
    /// Add context to an error.
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Display + Send + Sync + 'static;

    /// Add context to an error using a closure (lazy evaluation).
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T> Context<T> for Result<T> {
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
    {
        self.map_err(|e| Error::Context(context.to_string(), Box::new(e)))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|e| Error::Context(f().to_string(), Box::new(e)))
    }
}

impl<T> Context<T> for Option<T> {
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
    {
        self.ok_or_else(|| Error::GenericError(context.to_string()))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.ok_or_else(|| Error::GenericError(f().to_string()))
    }
}

/// Extension trait for filesystem operations with automatic path context.
pub trait ErrorExt<T> {
    /// Add filesystem context to an I/O error.
    ///
    /// The `context` should be a present-tense verb phrase describing the operation,
    /// e.g., "reading file", "creating directory", "copying binary".
    fn fs_context(self, context: &'static str, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> ErrorExt<T> for std::result::Result<T, std::io::Error> {
    fn fs_context(self, context: &'static str, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|error| Error::Fs {
            context,
            path: path.into(),
            error,
        })
    }
}

/// Macro for early return with error.
///
/// Converts the message into a [`Error::GenericError`] and returns immediately.
///
/// # Examples
///
/// ```ignore
/// bail!("operation failed");
/// bail!("invalid value: {}", value);
/// ```
#[macro_export]
macro_rules! bail {
    ($msg:literal $(,)?) => {
        return Err($crate::bundler::Error::GenericError(format!($msg)))
    };
    ($err:expr $(,)?) => {
        return Err($crate::bundler::Error::GenericError($err.to_string()))
    };
    ($fmt:expr, $($arg:tt)*) => {
        return Err($crate::bundler::Error::GenericError(format!($fmt, $($arg)*)))
    };
}
