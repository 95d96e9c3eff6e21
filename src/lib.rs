//! # Omaha Packager
//!
//! Build pipeline for update-client metainstallers.
//!
//! Given a version description and a directory of staged files, this crate
//! decides which files and languages the installer carries, packs them
//! into a deterministic archive, compresses and embeds them in a bootstrap
//! stub, signs the result and reserves room for per-deployment tags. Tags
//! are later stamped into the signed binary without invalidating its
//! signature.
//!
//! ## Features
//!
//! - **Version gating**: payload files and languages follow declarative
//!   compatibility rules keyed on the product version
//! - **Deterministic identifiers**: name-based GUIDs and compressed
//!   installer versions
//! - **Reproducible assembly**: identical inputs give a byte-identical
//!   unsigned installer
//! - **Signature-preserving tags**: tags live in certificate table padding
//!   that the signature does not cover
//! - **Parallel builds**: independent builds and tagging jobs run on a
//!   bounded worker pool
//!
//! ## Usage
//!
//! ```bash
//! omaha_packager build --version-file VERSION --config packager.toml --output out
//! omaha_packager tag --input out/GoogleUpdateSetup.exe --bundles bundles.txt --output tagged
//! omaha_packager extract-tag --input tagged/en/Tagged_ChromeSetup_en.exe
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Core modules
pub mod bundler;
pub mod cli;
pub mod error;
pub mod identifier;
pub mod payload;
pub mod tagging;
pub mod version;

// Re-export main types for public API
pub use bundler::{BuildMode, BuildRequest, BuildSettings, BundledArtifact, Bundler};
pub use cli::Args;
pub use error::{CliError, PackagerError, PayloadError, Result, TagError, VersionError};
pub use identifier::{convert_to_installer_version, derive_guid};
pub use tagging::{BinaryTagger, SignaturePolicy, TagPlacement};
pub use version::VersionDescriptor;
