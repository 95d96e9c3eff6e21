//! Error types for omaha_packager operations.
//!
//! This module defines the domain errors raised while reading versions,
//! resolving payloads and tagging binaries, together with the top-level
//! error that the CLI reports with actionable recovery suggestions.

use thiserror::Error;

/// Result type alias for omaha_packager operations
pub type Result<T> = std::result::Result<T, PackagerError>;

/// Main error type for all omaha_packager operations
#[derive(Error, Debug)]
pub enum PackagerError {
    /// Version descriptor errors
    #[error("Version error: {0}")]
    Version(#[from] VersionError),

    /// Payload resolution errors
    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),

    /// Binary tagging errors
    #[error("Tag error: {0}")]
    Tag(#[from] TagError),

    /// CLI argument errors
    #[error("CLI error: {0}")]
    Cli(#[from] CliError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Bundler pipeline errors
    #[error("Bundler error: {0}")]
    Bundler(#[from] crate::bundler::Error),
}

/// Version descriptor errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// Missing, non-integer or negative version field
    #[error("Invalid version format in {source_name}: {reason}")]
    InvalidVersionFormat {
        /// Name of the version source (file path or literal)
        source_name: String,
        /// Reason for the error
        reason: String,
    },

    /// The incrementing field of an official version must be odd
    #[error("Version {version}: {field} must be odd, found {value}")]
    OddnessInvariantViolated {
        /// Version string
        version: String,
        /// Name of the incrementing field (`build` or `patch`)
        field: &'static str,
        /// Offending value
        value: u32,
    },

    /// Test version delta must be positive
    #[error("Test version delta must be greater than zero, got {delta}")]
    InvalidDelta {
        /// Requested delta
        delta: u32,
    },

    /// Prefix is not one of the recognised test prefixes
    #[error("Unrecognized test prefix '{prefix}'")]
    UnrecognizedPrefix {
        /// Requested prefix
        prefix: String,
    },

    /// Patch cannot be encoded in an installer version
    #[error("Version {version}: patch {patch} exceeds 16383 and cannot be encoded as an installer version")]
    PatchOutOfRange {
        /// Version string
        version: String,
        /// Offending patch value
        patch: u32,
    },

    /// Build cannot be encoded in an installer version
    #[error("Version {version}: build {build} exceeds 65535 and cannot be encoded as an installer version")]
    BuildOutOfRange {
        /// Version string
        version: String,
        /// Offending build value
        build: u32,
    },
}

/// Payload resolution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// Version is older than (or falls between) the known compatibility rules
    #[error("Version {version} is not supported by any payload compatibility rule")]
    UnsupportedVersion {
        /// Version string
        version: String,
    },

    /// A requested language is not shipped for this version
    #[error("Language '{language}' is not available for version {version}")]
    UnsupportedLanguage {
        /// Requested language code
        language: String,
        /// Version string
        version: String,
    },

    /// A versioned plugin file is selected but the descriptor has no plugin version
    #[error("{file} needs an update plugin version, but version {version} does not carry one")]
    MissingPluginVersion {
        /// Base name of the versioned file
        file: String,
        /// Version string
        version: String,
    },
}

/// Binary tagging errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TagError {
    /// Tag payload exceeds the wire limit or the reserved budget
    #[error("Tag of {len} bytes does not fit (capacity {capacity} bytes)")]
    TagTooLarge {
        /// Payload length
        len: usize,
        /// Available capacity
        capacity: usize,
    },

    /// Binary carries no Authenticode signature
    #[error("Binary is not signed: {reason}")]
    Unsigned {
        /// Reason for the error
        reason: String,
    },

    /// Binary is not a PE image
    #[error("Unsupported binary format: {format}")]
    UnsupportedFormat {
        /// Detected format
        format: String,
    },

    /// PE headers or certificate table are inconsistent
    #[error("Malformed certificate table: {reason}")]
    MalformedCertificateTable {
        /// Reason for the error
        reason: String,
    },

    /// Signed binary has no reserved tag region
    #[error("No tag region in binary: {reason}")]
    NoTagRegion {
        /// Reason for the error
        reason: String,
    },

    /// Tag string contains characters outside the tag-safe set
    #[error("Invalid tag string '{tag}'")]
    InvalidTagString {
        /// Offending tag string
        tag: String,
    },

    /// Bundle description record could not be parsed
    #[error("Invalid bundle description at line {line}: {reason}")]
    InvalidBundle {
        /// One-based line number
        line: usize,
        /// Reason for the error
        reason: String,
    },
}

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Invalid command line arguments
    #[error("Invalid arguments: {reason}")]
    InvalidArguments {
        /// Reason for the error
        reason: String,
    },

    /// Command execution failed
    #[error("Command execution failed: {command} - {reason}")]
    ExecutionFailed {
        /// Command that failed
        command: String,
        /// Reason for the error
        reason: String,
    },
}

impl PackagerError {
    /// Get actionable recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<String> {
        if let PackagerError::Bundler(e) = self {
            match e.root() {
                crate::bundler::Error::Version(v) => return PackagerError::Version(v.clone()).recovery_suggestions(),
                crate::bundler::Error::Payload(p) => return PackagerError::Payload(p.clone()).recovery_suggestions(),
                crate::bundler::Error::Tag(t) => return PackagerError::Tag(t.clone()).recovery_suggestions(),
                _ => {}
            }
        }
        match self {
            PackagerError::Version(VersionError::OddnessInvariantViolated { field, .. }) => vec![
                format!("Official versions must have an odd {field}; bump it in the version file"),
                "Use --mode test to build a test version from an official one".to_string(),
            ],
            PackagerError::Version(VersionError::InvalidVersionFormat { .. }) => vec![
                "The version file needs version_major, version_minor, version_build and version_patch"
                    .to_string(),
                "Versions 1.3.0.0 and later also need update_plugin_version".to_string(),
            ],
            PackagerError::Payload(PayloadError::UnsupportedVersion { .. }) => vec![
                "Supported versions are 1.2.183.x through 1.2.x and 1.3.21.x onwards".to_string(),
            ],
            PackagerError::Payload(PayloadError::MissingPluginVersion { .. }) => vec![
                "Set update_plugin_version in the version file".to_string(),
            ],
            PackagerError::Tag(TagError::Unsigned { .. }) => vec![
                "Sign the installer before applying a certificate tag".to_string(),
                "Pass --allow-unsigned to use an appended tag for diagnostics".to_string(),
            ],
            PackagerError::Tag(TagError::TagTooLarge { .. }) => vec![
                "Shorten application names or split the bundle".to_string(),
                "Increase [tagging] budget and rebuild the installer".to_string(),
            ],
            PackagerError::Bundler(e) if e.is_process_failure() => vec![
                "Check that the external tool is installed and on PATH".to_string(),
                "Run with RUST_LOG=debug to see the exact command line".to_string(),
            ],
            _ => vec!["Check the error message above for specific details".to_string()],
        }
    }

    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            PackagerError::Version(_) | PackagerError::Payload(_) | PackagerError::Tag(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_errors_are_not_recoverable() {
        let err = PackagerError::from(VersionError::InvalidDelta { delta: 0 });
        assert!(!err.is_recoverable());

        let err = PackagerError::from(TagError::TagTooLarge {
            len: 70000,
            capacity: 65535,
        });
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_oddness_suggestion_names_field() {
        let err = PackagerError::from(VersionError::OddnessInvariantViolated {
            version: "1.3.100.0".to_string(),
            field: "build",
            value: 100,
        });
        let suggestions = err.recovery_suggestions();
        assert!(suggestions[0].contains("odd build"));
    }

    #[test]
    fn test_error_messages_carry_triggering_value() {
        let err = VersionError::PatchOutOfRange {
            version: "1.3.5.20000".to_string(),
            patch: 20000,
        };
        assert!(err.to_string().contains("20000"));
        assert!(err.to_string().contains("1.3.5.20000"));
    }

    #[test]
    fn test_pipeline_errors_use_domain_suggestions() {
        use crate::bundler::Stage;
        let inner = crate::bundler::Error::from(TagError::TagTooLarge { len: 9000, capacity: 8192 });
        let err = PackagerError::from(inner.in_stage(Stage::Tag, "9000 byte tag"));
        assert!(err.recovery_suggestions()[0].contains("Shorten"));
    }
}
