//! Command line argument parsing and validation.

use crate::bundler::BuildMode;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Metainstaller packaging and tagging
#[derive(Parser, Debug)]
#[command(
    name = "omaha_packager",
    version,
    about = "Build, sign and tag update-client metainstallers",
    long_about = "Assemble version-gated payloads into a signed metainstaller, then stamp
per-deployment tags into the signed binary without invalidating its signature.

Usage:
  omaha_packager build --version-file VERSION --config packager.toml --output out
  omaha_packager tag --input GoogleUpdateSetup.exe --bundles bundles.txt --output tagged
  omaha_packager extract-tag --input tagged/en/Tagged_ChromeSetup_en.exe"
)]
pub struct Args {
    /// Command to run
    #[command(subcommand)]
    pub command: Command,

    /// Show per-stage details
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

/// Build mode selector.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModeArg {
    /// Version as read
    #[default]
    Official,
    /// Bumped test version with the TEST_ prefix
    Test,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Assemble, sign and publish a metainstaller
    Build {
        /// Version description file
        #[arg(long, value_name = "FILE")]
        version_file: PathBuf,

        /// Build settings (TOML)
        #[arg(long, value_name = "FILE")]
        config: PathBuf,

        /// Output directory
        #[arg(long, value_name = "DIR")]
        output: PathBuf,

        /// File prefix for payload names and the output; repeat to build
        /// several installers in parallel
        #[arg(long, default_value = "")]
        prefix: Vec<String>,

        /// Official or test build
        #[arg(long, value_enum, default_value_t = ModeArg::Official)]
        mode: ModeArg,

        /// Amount added to the incrementing field of a test build
        #[arg(long, default_value_t = 1)]
        test_delta: u32,
    },

    /// Print the payload files and languages for a version
    Resolve {
        /// Version description file
        #[arg(long, value_name = "FILE")]
        version_file: PathBuf,

        /// File prefix for payload names
        #[arg(long, default_value = "")]
        prefix: String,

        /// Restrict resource languages (comma separated)
        #[arg(long, value_delimiter = ',')]
        languages: Option<Vec<String>>,
    },

    /// Stamp one tagged copy of an installer per bundle
    Tag {
        /// Signed installer to tag
        #[arg(long, value_name = "EXE")]
        input: PathBuf,

        /// Bundle description file
        #[arg(long, value_name = "FILE")]
        bundles: PathBuf,

        /// Output directory, shared by several bundle files
        #[arg(long, value_name = "DIR")]
        output: PathBuf,

        /// Name outputs for a test build even when the input lacks the TEST_ prefix
        #[arg(long)]
        test: bool,

        /// Permit unsigned input, tagged by appending
        #[arg(long)]
        allow_unsigned: bool,

        /// Append the tag instead of filling the certificate region
        #[arg(long)]
        appended: bool,

        /// Bytes reserved when the input has no tag region yet
        #[arg(long, value_name = "BYTES")]
        budget: Option<usize>,

        /// Concurrent tagging tasks
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Print the tag embedded in a binary
    ExtractTag {
        /// Tagged binary
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
    },

    /// Describe the payload and tag region of a built installer
    Inspect {
        /// Built installer
        #[arg(long, value_name = "EXE")]
        input: PathBuf,
    },

    /// Derive a name-based GUID
    Guid {
        /// Namespace as text
        #[arg(long, conflicts_with = "namespace_hex")]
        namespace: Option<String>,

        /// Namespace as hex bytes, defaults to the installer namespace
        #[arg(long)]
        namespace_hex: Option<String>,

        /// Name to derive from
        #[arg(long)]
        name: String,
    },

    /// Convert a four-field version to its installer form
    MsiVersion {
        /// Dotted version
        version: String,
    },

    /// Wrap an installer and the metainstaller into an enterprise MSI
    Enterprise {
        /// Build settings (TOML) with an [enterprise] section
        #[arg(long, value_name = "FILE")]
        config: PathBuf,

        /// Version description file, overrides enterprise.product_version
        #[arg(long, value_name = "FILE")]
        version_file: Option<PathBuf>,

        /// Output directory
        #[arg(long, value_name = "DIR")]
        output: PathBuf,

        /// Name the MSI as an unofficial build
        #[arg(long)]
        unofficial: bool,
    },
}

impl Command {
    /// Command name for diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            Command::Build { .. } => "build",
            Command::Resolve { .. } => "resolve",
            Command::Tag { .. } => "tag",
            Command::ExtractTag { .. } => "extract-tag",
            Command::Inspect { .. } => "inspect",
            Command::Guid { .. } => "guid",
            Command::MsiVersion { .. } => "msi-version",
            Command::Enterprise { .. } => "enterprise",
        }
    }
}

impl ModeArg {
    /// Build mode for `delta`.
    pub fn build_mode(self, delta: u32) -> BuildMode {
        match self {
            ModeArg::Official => BuildMode::Official,
            ModeArg::Test => BuildMode::Test { delta },
        }
    }
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate arguments for consistency
    pub fn validate(&self) -> Result<(), String> {
        match &self.command {
            Command::Build { mode, test_delta, .. } if *mode == ModeArg::Test && *test_delta == 0 => {
                Err("--test-delta must be greater than zero".to_string())
            }
            Command::Tag { budget: Some(budget), .. } if *budget > usize::from(u16::MAX) => {
                Err(format!("--budget {budget} exceeds the 65535-byte tag limit"))
            }
            Command::Tag { workers: Some(0), .. } => Err("--workers must be at least 1".to_string()),
            Command::Guid { name, .. } if name.is_empty() => Err("--name must not be empty".to_string()),
            _ => Ok(()),
        }
    }
}

/// Configuration derived from command line arguments
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    output: super::OutputManager,
    json: bool,
}

impl RuntimeConfig {
    /// Get a reference to the output manager
    pub fn output(&self) -> &super::OutputManager {
        &self.output
    }

    /// Whether results are printed as JSON
    pub fn is_json(&self) -> bool {
        self.json
    }
}

impl From<&Args> for RuntimeConfig {
    fn from(args: &Args) -> Self {
        Self {
            output: super::OutputManager::new(args.verbose, args.quiet || args.json),
            json: args.json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_build() {
        let args = Args::try_parse_from([
            "omaha_packager",
            "build",
            "--version-file",
            "VERSION",
            "--config",
            "packager.toml",
            "--output",
            "out",
            "--mode",
            "test",
        ])
        .unwrap();
        assert_eq!(args.command.name(), "build");
        match args.command {
            Command::Build { mode, test_delta, .. } => {
                assert_eq!(mode.build_mode(test_delta), BuildMode::Test { delta: 1 });
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_languages_are_comma_separated() {
        let args = Args::try_parse_from([
            "omaha_packager",
            "resolve",
            "--version-file",
            "VERSION",
            "--languages",
            "en,fr",
        ])
        .unwrap();
        match args.command {
            Command::Resolve { languages, .. } => assert_eq!(languages.unwrap(), ["en", "fr"]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_zero_test_delta_is_rejected() {
        let args = Args::try_parse_from([
            "omaha_packager",
            "build",
            "--version-file",
            "V",
            "--config",
            "C",
            "--output",
            "O",
            "--mode",
            "test",
            "--test-delta",
            "0",
        ])
        .unwrap();
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_namespace_flags_conflict() {
        let result = Args::try_parse_from([
            "omaha_packager",
            "guid",
            "--namespace",
            "a",
            "--namespace-hex",
            "00",
            "--name",
            "b",
        ]);
        assert!(result.is_err());
    }
}
