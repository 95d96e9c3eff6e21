//! Configuration structures for installer assembly.
//!
//! Settings are read from a TOML file. Every section has defaults, so a
//! minimal file only names the payload directory and the stub:
//!
//! ```toml
//! payload_dir = "staging"
//! stub = "staging/mi_exe_stub.exe"
//!
//! [compression]
//! kind = "gzip"
//! level = 9
//!
//! [signing]
//! certificate = "certs/release.pfx"
//! dual_sign = true
//! ```

use crate::bundler::error::{Context, ErrorExt};
use crate::bundler::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default timestamp server.
pub const DEFAULT_TIMESTAMP_URL: &str = "http://timestamp.digicert.com";

/// Default number of signing attempts.
pub const DEFAULT_SIGN_ATTEMPTS: u32 = 10;

/// Default fixed delay between signing attempts.
pub const DEFAULT_SIGN_BACKOFF_SECS: u64 = 5;

/// Default tag budget reserved in the certificate table.
pub const DEFAULT_TAG_BUDGET: usize = 8192;

/// Compression algorithm applied to the payload archive.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    /// gzip via flate2 (default)
    #[default]
    Gzip,
    /// No compression
    Store,
    /// External compressor program
    External,
}

/// Payload compression settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionSettings {
    /// Algorithm
    pub kind: CompressionKind,
    /// Compression level (gzip: 0-9)
    pub level: u32,
    /// Apply the branch filter when the compressor benefits from it
    pub branch_filter: bool,
    /// External compressor program
    pub program: String,
    /// External compressor arguments with `{input}`/`{output}` placeholders
    pub args: Vec<String>,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            kind: CompressionKind::Gzip,
            level: 9,
            branch_filter: true,
            program: "lzma".to_string(),
            args: vec![
                "e".to_string(),
                "{input}".to_string(),
                "{output}".to_string(),
            ],
        }
    }
}

/// How the resource container is compiled.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceCompilerKind {
    /// Built-in packed container
    #[default]
    Packed,
    /// External resource compiler and linker
    External,
}

/// Resource embedding settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSettings {
    /// Compiler selection
    pub compiler: ResourceCompilerKind,
    /// External resource compiler
    pub rc_program: String,
    /// External linker producing the resource-only DLL
    pub link_program: String,
}

impl Default for ResourceSettings {
    fn default() -> Self {
        Self {
            compiler: ResourceCompilerKind::Packed,
            rc_program: "rc".to_string(),
            link_program: "link".to_string(),
        }
    }
}

/// Code signing settings.
///
/// Without a certificate, signing copies the input unchanged.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningSettings {
    /// Signing tool
    pub tool: String,
    /// Certificate file (.pfx)
    pub certificate: Option<PathBuf>,
    /// Certificate password
    pub password: Option<String>,
    /// Certificate subject name
    pub subject_name: Option<String>,
    /// Certificate store
    pub store: Option<String>,
    /// Certificate thumbprint
    pub sha1_hash: Option<String>,
    /// Timestamp server
    pub timestamp_url: String,
    /// Sign with SHA-1, then append a SHA-256 signature
    pub dual_sign: bool,
    /// Attempts per signing pass
    pub attempts: u32,
    /// Fixed delay between attempts, in seconds
    pub backoff_secs: u64,
    /// Timeout per signing invocation, in seconds
    pub timeout_secs: u64,
}

impl Default for SigningSettings {
    fn default() -> Self {
        Self {
            tool: "signtool".to_string(),
            certificate: None,
            password: None,
            subject_name: None,
            store: None,
            sha1_hash: None,
            timestamp_url: DEFAULT_TIMESTAMP_URL.to_string(),
            dual_sign: false,
            attempts: DEFAULT_SIGN_ATTEMPTS,
            backoff_secs: DEFAULT_SIGN_BACKOFF_SECS,
            timeout_secs: 300,
        }
    }
}

impl SigningSettings {
    /// Whether a certificate is configured.
    pub fn is_configured(&self) -> bool {
        self.certificate.is_some() || self.subject_name.is_some() || self.sha1_hash.is_some()
    }

    /// Fixed delay between attempts.
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

/// Tag reservation settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TaggingSettings {
    /// Reserve a tag region in the certificate table after signing
    pub reserve: bool,
    /// Bytes reserved for the tag payload
    pub budget: usize,
    /// Permit appended tags on unsigned builds
    pub allow_unsigned: bool,
}

impl Default for TaggingSettings {
    fn default() -> Self {
        Self {
            reserve: true,
            budget: DEFAULT_TAG_BUDGET,
            allow_unsigned: false,
        }
    }
}

/// Enterprise MSI wrapper settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EnterpriseSettings {
    /// Product display name
    pub product_name: String,
    /// Product version passed to the installer
    pub product_version: String,
    /// App GUID
    pub product_guid: String,
    /// Custom installer parameters
    pub custom_params: String,
    /// Base name of the produced MSI
    pub msi_base_name: String,
    /// Product installer wrapped by the MSI
    pub product_installer: Option<PathBuf>,
    /// Tagged metainstaller wrapped by the MSI
    pub metainstaller: Option<PathBuf>,
    /// WiX source template
    pub wxs_template: Option<PathBuf>,
    /// Installer-transform compiler
    pub candle_program: String,
    /// Installer linker
    pub light_program: String,
}

impl Default for EnterpriseSettings {
    fn default() -> Self {
        Self {
            product_name: String::new(),
            product_version: String::new(),
            product_guid: String::new(),
            custom_params: String::new(),
            msi_base_name: String::new(),
            product_installer: None,
            metainstaller: None,
            wxs_template: None,
            candle_program: "candle".to_string(),
            light_program: "light".to_string(),
        }
    }
}

/// An offline app installer carried in standalone payloads.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OfflineAppSettings {
    /// App GUID
    pub app_guid: String,
    /// Installer binary
    pub installer: PathBuf,
    /// Manifest for the app
    pub manifest: PathBuf,
}

/// Complete build configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSettings {
    /// Directory holding the payload files
    pub payload_dir: PathBuf,
    /// Empty bootstrap executable
    pub stub: PathBuf,
    /// Dependency manifest bound into the resource container
    pub manifest: Option<PathBuf>,
    /// Resource identifier header bound into the resource container
    pub resource_header: Option<PathBuf>,
    /// Installer name without prefix or extension
    pub installer_name: String,
    /// Restrict resource languages to this subset
    pub languages: Option<Vec<String>>,
    /// Offline app installers appended after the resolved payload
    pub offline_apps: Vec<OfflineAppSettings>,
    /// Compression
    pub compression: CompressionSettings,
    /// Resource embedding
    pub resources: ResourceSettings,
    /// Signing
    pub signing: SigningSettings,
    /// Tag reservation
    pub tagging: TaggingSettings,
    /// Enterprise MSI wrapper
    pub enterprise: EnterpriseSettings,
    /// Concurrent builds, defaults to the CPU count
    pub workers: Option<usize>,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            payload_dir: PathBuf::from("."),
            stub: PathBuf::from("mi_exe_stub.exe"),
            manifest: None,
            resource_header: None,
            installer_name: "GoogleUpdateSetup".to_string(),
            languages: None,
            offline_apps: Vec::new(),
            compression: CompressionSettings::default(),
            resources: ResourceSettings::default(),
            signing: SigningSettings::default(),
            tagging: TaggingSettings::default(),
            enterprise: EnterpriseSettings::default(),
            workers: None,
        }
    }
}

impl BuildSettings {
    /// Starts a builder with default settings.
    pub fn builder() -> BuildSettingsBuilder {
        BuildSettingsBuilder::default()
    }

    /// Parses settings from TOML text.
    ///
    /// Relative paths are resolved against `base_dir`.
    pub fn from_toml_str(text: &str, base_dir: &Path) -> Result<Self> {
        let mut settings: BuildSettings = toml::from_str(text)?;
        settings.resolve_paths(base_dir);
        settings.validate()?;
        Ok(settings)
    }

    /// Loads settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).fs_context("reading build settings", path)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_toml_str(&text, base).with_context(|| format!("loading {}", path.display()))
    }

    /// Number of concurrent builds.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get).max(1)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        join(&mut self.payload_dir);
        join(&mut self.stub);
        for path in [
            &mut self.manifest,
            &mut self.resource_header,
            &mut self.signing.certificate,
            &mut self.enterprise.product_installer,
            &mut self.enterprise.metainstaller,
            &mut self.enterprise.wxs_template,
        ]
        .into_iter()
        .flatten()
        {
            join(path);
        }
        for app in &mut self.offline_apps {
            join(&mut app.installer);
            join(&mut app.manifest);
        }
    }

    /// Checks values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        if self.installer_name.trim().is_empty() {
            return Err(Error::GenericError("installer_name must not be empty".into()));
        }
        if self.tagging.budget > usize::from(u16::MAX) {
            return Err(Error::GenericError(format!(
                "tagging.budget {} exceeds the 65535-byte tag limit",
                self.tagging.budget
            )));
        }
        if self.signing.attempts == 0 {
            return Err(Error::GenericError("signing.attempts must be at least 1".into()));
        }
        if self.compression.kind == CompressionKind::External && self.compression.program.is_empty() {
            return Err(Error::GenericError(
                "compression.program is required for external compression".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`BuildSettings`].
///
/// # Example
///
/// ```no_run
/// use omaha_packager::bundler::BuildSettings;
///
/// let settings = BuildSettings::builder()
///     .payload_dir("staging")
///     .stub("staging/mi_exe_stub.exe")
///     .languages(vec!["en".into(), "fr".into()])
///     .build()?;
/// # Ok::<(), omaha_packager::bundler::Error>(())
/// ```
#[derive(Default)]
pub struct BuildSettingsBuilder {
    settings: BuildSettings,
}

impl BuildSettingsBuilder {
    /// Sets the payload directory.
    pub fn payload_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.settings.payload_dir = path.as_ref().to_path_buf();
        self
    }

    /// Sets the bootstrap stub.
    pub fn stub<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.settings.stub = path.as_ref().to_path_buf();
        self
    }

    /// Sets the dependency manifest.
    pub fn manifest<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.settings.manifest = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets the installer name.
    pub fn installer_name(mut self, name: impl Into<String>) -> Self {
        self.settings.installer_name = name.into();
        self
    }

    /// Restricts resource languages.
    pub fn languages(mut self, languages: Vec<String>) -> Self {
        self.settings.languages = Some(languages);
        self
    }

    /// Sets compression.
    pub fn compression(mut self, compression: CompressionSettings) -> Self {
        self.settings.compression = compression;
        self
    }

    /// Sets signing.
    pub fn signing(mut self, signing: SigningSettings) -> Self {
        self.settings.signing = signing;
        self
    }

    /// Sets tagging.
    pub fn tagging(mut self, tagging: TaggingSettings) -> Self {
        self.settings.tagging = tagging;
        self
    }

    /// Sets the worker count.
    pub fn workers(mut self, workers: usize) -> Self {
        self.settings.workers = Some(workers);
        self
    }

    /// Builds the settings.
    ///
    /// # Errors
    ///
    /// Returns an error when the settings fail [`BuildSettings::validate`].
    pub fn build(self) -> Result<BuildSettings> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_file_uses_defaults() {
        let settings = BuildSettings::from_toml_str(
            "payload_dir = \"staging\"\nstub = \"staging/stub.exe\"\n",
            Path::new("/build"),
        )
        .unwrap();
        assert_eq!(settings.payload_dir, PathBuf::from("/build/staging"));
        assert_eq!(settings.stub, PathBuf::from("/build/staging/stub.exe"));
        assert_eq!(settings.compression.kind, CompressionKind::Gzip);
        assert_eq!(settings.signing.attempts, 10);
        assert_eq!(settings.signing.backoff(), Duration::from_secs(5));
        assert_eq!(settings.signing.timestamp_url, DEFAULT_TIMESTAMP_URL);
        assert_eq!(settings.tagging.budget, 8192);
        assert!(!settings.signing.is_configured());
    }

    #[test]
    fn test_sections_override() {
        let text = r#"
            installer_name = "UpdateSetup"
            languages = ["en", "fr"]

            [compression]
            kind = "store"

            [signing]
            certificate = "/certs/release.pfx"
            dual_sign = true

            [[offline_apps]]
            app_guid = "{8A69D345-D564-463C-AFF1-A69D9E530F96}"
            installer = "apps/chrome_installer.exe"
            manifest = "apps/chrome.gup"
        "#;
        let settings = BuildSettings::from_toml_str(text, Path::new("/build")).unwrap();
        assert_eq!(settings.compression.kind, CompressionKind::Store);
        assert!(settings.signing.dual_sign);
        assert!(settings.signing.is_configured());
        assert_eq!(settings.signing.certificate, Some(PathBuf::from("/certs/release.pfx")));
        assert_eq!(settings.languages.as_deref(), Some(&["en".to_string(), "fr".to_string()][..]));
        assert_eq!(
            settings.offline_apps[0].installer,
            PathBuf::from("/build/apps/chrome_installer.exe")
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(BuildSettings::from_toml_str("[tagging]\nbudget = 70000\n", Path::new(".")).is_err());
        assert!(BuildSettings::from_toml_str("[signing]\nattempts = 0\n", Path::new(".")).is_err());
        assert!(BuildSettings::from_toml_str("[compression]\nkind = \"xz\"\n", Path::new(".")).is_err());
    }

    #[test]
    fn test_builder() {
        let settings = BuildSettings::builder()
            .payload_dir("/staging")
            .installer_name("Setup")
            .workers(2)
            .build()
            .unwrap();
        assert_eq!(settings.worker_count(), 2);
        assert_eq!(settings.installer_name, "Setup");
        assert!(BuildSettings::builder().installer_name(" ").build().is_err());
    }
}
