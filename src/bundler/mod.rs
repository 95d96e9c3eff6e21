//! Installer assembly pipeline.
//!
//! Turns a version descriptor and a directory of staged files into a signed
//! metainstaller:
//!
//! ```text
//! resolve -> archive -> branch-filter -> compress -> resource-embed
//!         -> stub-merge -> sign -> reserve-tag -> publish
//! ```
//!
//! Each stage writes a fresh file into a private work directory, so
//! independent builds can run in parallel through [`Bundler::build_all`].
//! Failures carry the [`Stage`] that failed and the value it was
//! processing.
//!
//! # Configuration
//!
//! Builds are configured through a TOML file:
//!
//! ```toml
//! payload_dir = "staging"
//! stub = "staging/mi_exe_stub.exe"
//! installer_name = "UpdateSetup"
//! languages = ["en", "fr"]
//!
//! [compression]
//! kind = "gzip"
//!
//! [signing]
//! certificate = "release.pfx"
//! ```
//!
//! # Example
//!
//! ```no_run
//! use omaha_packager::bundler::{BuildMode, BuildRequest, BuildSettings, Bundler};
//! use omaha_packager::version::load_version_file;
//! use std::path::Path;
//!
//! # fn example() -> omaha_packager::bundler::Result<()> {
//! let settings = BuildSettings::load(Path::new("packager.toml"))?;
//! let bundler = Bundler::new(settings)?;
//! let artifact = bundler.build(&BuildRequest {
//!     version: load_version_file(Path::new("VERSION"))?,
//!     prefix: String::new(),
//!     mode: BuildMode::Official,
//!     output_dir: "out".into(),
//! })?;
//! println!("{} ({} bytes, sha256 {})", artifact.name, artifact.size, artifact.checksum);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod archive;
pub mod branch_filter;
mod builder;
pub mod compress;
mod context;
mod enterprise;
mod error;
pub mod pool;
pub mod process;
pub mod resource;
mod settings;
pub mod sign;
pub mod stub;
pub mod utils;

pub use builder::{BuildMode, BuildRequest, Bundler, UNOFFICIAL_PREFIX};
pub use context::{BuildContext, Stage, StageRecord};
pub use enterprise::EnterpriseInstaller;
pub use error::{Context, Error, ErrorExt, Result};
pub use settings::{
    BuildSettings, BuildSettingsBuilder, CompressionKind, CompressionSettings, DEFAULT_SIGN_ATTEMPTS,
    DEFAULT_SIGN_BACKOFF_SECS, DEFAULT_TAG_BUDGET, DEFAULT_TIMESTAMP_URL, EnterpriseSettings, OfflineAppSettings,
    ResourceCompilerKind, ResourceSettings, SigningSettings, TaggingSettings,
};

use serde::Serialize;
use std::path::PathBuf;

/// A published installer.
///
/// Returned by [`Bundler::build`] and [`EnterpriseInstaller::build`].
#[derive(Debug, Clone, Serialize)]
pub struct BundledArtifact {
    /// File name of the published installer
    pub name: String,

    /// Where the installer was published
    pub path: PathBuf,

    /// Version embedded in the installer
    pub version: String,

    /// Size of the installer in bytes
    pub size: u64,

    /// SHA-256 checksum of the installer
    pub checksum: String,

    /// Whether a signature was applied
    pub signed: bool,

    /// Bytes reserved for per-deployment tags, `None` when no region was
    /// reserved.
    pub tag_capacity: Option<usize>,

    /// Archive entry names, in archive order.
    pub entries: Vec<String>,

    /// Contents log written next to the installer.
    pub contents_log: PathBuf,
}
