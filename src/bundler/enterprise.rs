//! Enterprise MSI wrapper.
//!
//! Wraps a product installer and the metainstaller into an MSI for
//! deployment through group policy. Product and upgrade codes are derived
//! from names so rebuilding the same product yields the same codes:
//!
//! * product code: `Product {product_name} {msi_base_name}` (a renamed MSI
//!   must get a new product code)
//! * upgrade code: `Upgrade {product_name}`
//!
//! The WiX source is compiled with the installer-transform compiler, linked
//! with the installer linker, then signed.

use crate::bundler::builder::UNOFFICIAL_PREFIX;
use crate::bundler::context::Stage;
use crate::bundler::error::{Context, ErrorExt};
use crate::bundler::process::{ProcessRunner, ToolCommand, run_tool};
use crate::bundler::settings::{EnterpriseSettings, SigningSettings};
use crate::bundler::sign::{SignTool, Signer};
use crate::bundler::utils::fs::{copy_atomic, sha256_file};
use crate::bundler::{BundledArtifact, Result};
use crate::identifier::{convert_to_installer_version, derive_guid, installer_namespace};
use std::path::{Path, PathBuf};

/// Enterprise MSI build.
pub struct EnterpriseInstaller<'a> {
    settings: &'a EnterpriseSettings,
    signing: &'a SigningSettings,
    runner: &'a dyn ProcessRunner,
}

impl<'a> EnterpriseInstaller<'a> {
    /// Creates a build from `settings`.
    pub fn new(settings: &'a EnterpriseSettings, signing: &'a SigningSettings, runner: &'a dyn ProcessRunner) -> Self {
        Self {
            settings,
            signing,
            runner,
        }
    }

    /// MSI product code.
    pub fn product_code(&self) -> String {
        let name = format!("Product {} {}", self.settings.product_name, self.settings.msi_base_name);
        derive_guid(&installer_namespace(), name.as_bytes())
    }

    /// MSI upgrade code.
    pub fn upgrade_code(&self) -> String {
        let name = format!("Upgrade {}", self.settings.product_name);
        derive_guid(&installer_namespace(), name.as_bytes())
    }

    /// Installer version of the product; non-4-field input passes through.
    pub fn msi_version(&self) -> Result<String> {
        Ok(convert_to_installer_version(&self.settings.product_version)?)
    }

    /// `-d` defines passed to the installer-transform compiler.
    pub fn candle_defines(&self) -> Result<Vec<String>> {
        let s = self.settings;
        let product_installer = s
            .product_installer
            .as_ref()
            .context("enterprise.product_installer is not set")?;
        let metainstaller = s.metainstaller.as_ref().context("enterprise.metainstaller is not set")?;

        Ok(vec![
            format!("-dProductName={}", s.product_name),
            format!("-dProductNameLegalIdentifier={}", s.product_name.replace(' ', "")),
            format!("-dProductVersion={}", self.msi_version()?),
            format!("-dProductGuid={}", s.product_guid),
            format!("-dProductCustomParams={}", s.custom_params),
            format!("-dMsiProductId={}", self.product_code()),
            format!("-dMsiUpgradeCode={}", self.upgrade_code()),
            format!("-dProductInstallerPath={}", product_installer.display()),
            format!("-dGoogleUpdateMetainstallerPath={}", metainstaller.display()),
        ])
    }

    /// Published MSI file name.
    pub fn msi_name(&self, official: bool) -> String {
        let unofficial = if official { "" } else { UNOFFICIAL_PREFIX };
        format!("{unofficial}{}.msi", self.settings.msi_base_name)
    }

    fn validate(&self) -> Result<()> {
        let s = self.settings;
        for (value, key) in [
            (&s.product_name, "product_name"),
            (&s.product_version, "product_version"),
            (&s.product_guid, "product_guid"),
            (&s.msi_base_name, "msi_base_name"),
        ] {
            if value.trim().is_empty() {
                return Err(crate::bundler::Error::GenericError(format!("enterprise.{key} is not set")));
            }
        }
        Ok(())
    }

    /// Compiles, links and signs the MSI in `work_dir`, publishing it to
    /// `output_dir`.
    pub fn build(&self, work_dir: &Path, output_dir: &Path, official: bool) -> Result<BundledArtifact> {
        self.validate()?;
        let name = self.msi_name(official);
        let base = &self.settings.msi_base_name;
        let template = self
            .settings
            .wxs_template
            .as_ref()
            .context("enterprise.wxs_template is not set")?;

        let wxs = work_dir.join(format!("{base}.wxs"));
        std::fs::copy(template, &wxs).fs_context("copying WiX template", template)?;

        let wixobj = work_dir.join(format!("{base}.wixobj"));
        let candle = ToolCommand::new(&self.settings.candle_program)
            .arg("-nologo")
            .arg("-out")
            .path_arg(&wixobj)
            .path_arg(&wxs)
            .args(self.candle_defines()?)
            .current_dir(work_dir);
        run_tool(self.runner, &candle, &wixobj).map_err(|e| e.in_stage(Stage::ResourceEmbed, wxs.display().to_string()))?;

        let unsigned = work_dir.join(format!("unsigned_{name}"));
        let light = ToolCommand::new(&self.settings.light_program)
            .arg("-nologo")
            .arg("-out")
            .path_arg(&unsigned)
            .path_arg(&wixobj)
            .current_dir(work_dir);
        run_tool(self.runner, &light, &unsigned).map_err(|e| e.in_stage(Stage::StubMerge, wixobj.display().to_string()))?;

        let signed_path = work_dir.join(&name);
        let signed = SignTool::new(self.runner, self.signing.clone())
            .sign(&unsigned, &signed_path)
            .map_err(|e| e.in_stage(Stage::Sign, name.clone()))?;

        let target: PathBuf = output_dir.join(&name);
        copy_atomic(&signed_path, &target).map_err(|e| e.in_stage(Stage::Publish, target.display().to_string()))?;
        let size = std::fs::metadata(&target).fs_context("reading MSI metadata", &target)?.len();

        log::info!("Published {} (product code {})", target.display(), self.product_code());
        Ok(BundledArtifact {
            name,
            path: target.clone(),
            version: self.msi_version()?,
            size,
            checksum: sha256_file(&target)?,
            signed,
            tag_capacity: None,
            entries: Vec::new(),
            contents_log: PathBuf::new(),
        })
    }
}
