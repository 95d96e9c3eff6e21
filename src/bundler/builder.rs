//! Metainstaller pipeline orchestration.
//!
//! The [`Bundler`] drives one [`BuildContext`] through every stage:
//!
//! 1. Resolve the payload file list for the version
//! 2. Archive the files deterministically
//! 3. Branch-filter the archive when the compressor benefits
//! 4. Compress
//! 5. Render and compile the resource description
//! 6. Merge the resource container into the stub
//! 7. Sign (external signer)
//! 8. Reserve the certificate-table tag region
//! 9. Publish under the final name with temp-then-rename
//!
//! Each stage reads the closed output of the previous one. Intermediates
//! live in a temp work directory next to the output, which is removed when
//! the build ends; a failed build never leaves a file under the final name.
//!
//! # Example
//!
//! ```no_run
//! use omaha_packager::bundler::{BuildMode, BuildRequest, BuildSettings, Bundler};
//! use omaha_packager::version::load_version_file;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = BuildSettings::load(Path::new("packager.toml"))?;
//! let bundler = Bundler::new(settings)?;
//! let request = BuildRequest {
//!     version: load_version_file(Path::new("VERSION"))?,
//!     prefix: String::new(),
//!     mode: BuildMode::Official,
//!     output_dir: "out".into(),
//! };
//! let artifact = bundler.build(&request)?;
//! println!("{} ({} bytes, sha256 {})", artifact.path.display(), artifact.size, artifact.checksum);
//! # Ok(())
//! # }
//! ```

use crate::bail;
use crate::bundler::archive::{OfflineApp, offline_entries, payload_entries, write_archive};
use crate::bundler::branch_filter;
use crate::bundler::compress::{self, Compressor};
use crate::bundler::context::{BuildContext, Stage};
use crate::bundler::error::{Context, ErrorExt};
use crate::bundler::pool::run_blocking;
use crate::bundler::process::{ProcessRunner, SystemRunner};
use crate::bundler::resource::{
    ExternalResourceCompiler, PackedResourceCompiler, ResourceCompiler, ResourceInputs, render_description,
};
use crate::bundler::settings::{BuildSettings, ResourceCompilerKind};
use crate::bundler::sign::{SignTool, Signer};
use crate::bundler::stub::merge_files;
use crate::bundler::utils::fs::{copy_atomic, sha256_file, write_atomic};
use crate::bundler::{BundledArtifact, Result};
use crate::payload::{resolve_files, resolve_files_for_languages};
use crate::tagging::{BinaryTagger, tag_capacity};
use crate::version::{RECOGNIZED_TEST_PREFIXES, SignedFileInfo, VersionDescriptor};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

/// Whether `signtool` is on PATH.
static HAS_SIGNTOOL: LazyLock<bool> = LazyLock::new(|| match which::which("signtool") {
    Ok(path) => {
        log::debug!("Found signtool at: {}", path.display());
        true
    }
    Err(e) => {
        log::debug!("signtool not found in PATH: {}", e);
        false
    }
});

/// Prefix for standalone installers that are not official builds.
pub const UNOFFICIAL_PREFIX: &str = "UNOFFICIAL_";

/// Official or test build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Version as read; the incrementing field must be odd
    Official,
    /// Version bumped by `delta` and prefixed `TEST_`
    Test {
        /// Amount added to the incrementing field
        delta: u32,
    },
}

/// One metainstaller build.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Version as read from the version file
    pub version: VersionDescriptor,
    /// File prefix for payload names and the output
    pub prefix: String,
    /// Official or test build
    pub mode: BuildMode,
    /// Directory receiving the published installer
    pub output_dir: PathBuf,
}

/// Pipeline driver.
pub struct Bundler {
    settings: BuildSettings,
    runner: Arc<dyn ProcessRunner>,
}

impl std::fmt::Debug for Bundler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bundler")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Bundler {
    /// Creates a bundler running external tools on the host.
    pub fn new(settings: BuildSettings) -> Result<Self> {
        settings.validate()?;
        if settings.signing.is_configured() && settings.signing.tool == "signtool" && !*HAS_SIGNTOOL {
            log::warn!("Signing is configured but signtool is not on PATH");
        }
        let timeout = std::time::Duration::from_secs(settings.signing.timeout_secs);
        Ok(Self::with_runner(settings, Arc::new(SystemRunner::with_timeout(timeout))))
    }

    /// Creates a bundler using `runner` for external tools.
    pub fn with_runner(settings: BuildSettings, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { settings, runner }
    }

    /// Returns a reference to the bundler settings.
    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    /// Whether this bundler produces standalone (offline) installers.
    pub fn is_standalone(&self) -> bool {
        !self.settings.offline_apps.is_empty()
    }

    /// Version actually built for `request`.
    ///
    /// The version as read must satisfy the oddness rule in both modes; a
    /// test build then bumps it.
    pub fn effective_version(&self, request: &BuildRequest) -> Result<VersionDescriptor> {
        request
            .version
            .validate()
            .map_err(|e| crate::bundler::Error::from(e).in_stage(Stage::Resolve, request.version.to_string()))?;
        match request.mode {
            BuildMode::Official => Ok(request.version.clone()),
            BuildMode::Test { delta } => {
                let test = request
                    .version
                    .as_test_version(delta, RECOGNIZED_TEST_PREFIXES[0])
                    .map_err(|e| crate::bundler::Error::from(e).in_stage(Stage::Resolve, request.version.to_string()))?;
                log::warn!("Building test version {} from {}", test, request.version);
                Ok(test)
            }
        }
    }

    /// Payload file prefix: the test prefix (if any) then the request prefix.
    pub fn file_prefix(request: &BuildRequest, version: &VersionDescriptor) -> String {
        if request.prefix.starts_with(version.file_prefix()) {
            request.prefix.clone()
        } else {
            format!("{}{}", version.file_prefix(), request.prefix)
        }
    }

    /// Published file name, e.g. `TEST_GoogleUpdateSetup.exe`.
    pub fn output_name(&self, prefix: &str, mode: BuildMode) -> String {
        let unofficial = match mode {
            BuildMode::Test { .. } if self.is_standalone() => UNOFFICIAL_PREFIX,
            _ => "",
        };
        format!("{prefix}{unofficial}{}.exe", self.settings.installer_name)
    }

    /// Runs the full pipeline for one request.
    pub fn build(&self, request: &BuildRequest) -> Result<BundledArtifact> {
        let version = self.effective_version(request)?;
        let prefix = Self::file_prefix(request, &version);
        let name = self.output_name(&prefix, request.mode);

        std::fs::create_dir_all(&request.output_dir)
            .fs_context("creating output directory", &request.output_dir)?;
        let work_dir = tempfile::Builder::new()
            .prefix(".omaha-build-")
            .tempdir_in(&request.output_dir)
            .fs_context("creating work directory", &request.output_dir)?;

        let ctx = BuildContext::new(version, work_dir.path());
        let ctx = self.assemble(ctx, &prefix, &name)?;
        let ctx = self.sign(ctx, &name)?;
        let ctx = self.reserve_tag(ctx)?;
        self.publish(ctx, &request.output_dir, &name)
    }

    /// Builds every request on the worker pool.
    ///
    /// Results are in request order.
    pub async fn build_all(self: Arc<Self>, requests: Vec<BuildRequest>) -> Vec<Result<BundledArtifact>> {
        let workers = self.settings.worker_count();
        let jobs: Vec<_> = requests
            .into_iter()
            .map(|request| {
                let bundler = Arc::clone(&self);
                move || bundler.build(&request)
            })
            .collect();
        run_blocking(jobs, workers).await
    }

    /// Resolve through stub merge: produces the unsigned installer.
    ///
    /// Identical inputs produce a byte-identical unsigned installer.
    pub fn assemble(&self, ctx: BuildContext, prefix: &str, name: &str) -> Result<BuildContext> {
        let runner = self.runner.as_ref();
        let compressor = compress::from_settings(&self.settings.compression, runner);

        let (ctx, files) = self.resolve(ctx, prefix)?;
        let ctx = self.archive(ctx, &files)?;
        let ctx = self.branch_filter(ctx, compressor.as_ref())?;
        let ctx = self.compress(ctx, compressor.as_ref())?;
        let ctx = self.embed_resources(ctx, runner)?;
        self.merge_stub(ctx, name)
    }

    fn resolve(&self, ctx: BuildContext, prefix: &str) -> Result<(BuildContext, Vec<String>)> {
        let version = ctx.version();
        let files = match &self.settings.languages {
            Some(languages) => resolve_files_for_languages(prefix, version, languages.as_slice()),
            None => resolve_files(prefix, version),
        }
        .map_err(|e| crate::bundler::Error::from(e).in_stage(Stage::Resolve, version.to_string()))?;
        log::debug!("payload for {}: {}", version, files.join(", "));
        Ok((ctx, files))
    }

    fn archive(&self, mut ctx: BuildContext, files: &[String]) -> Result<BuildContext> {
        let mut entries = payload_entries(&self.settings.payload_dir, files);
        let apps: Vec<OfflineApp> = self
            .settings
            .offline_apps
            .iter()
            .map(|app| OfflineApp {
                app_guid: app.app_guid.clone(),
                installer: app.installer.clone(),
                manifest: app.manifest.clone(),
            })
            .collect();
        entries.extend(offline_entries(&apps).map_err(|e| e.in_stage(Stage::Archive, "offline apps"))?);

        if let Some(missing) = entries.iter().find(|e| !e.source.is_file()) {
            return Err(crate::bundler::Error::GenericError(format!(
                "payload file {} not found",
                missing.source.display()
            ))
            .in_stage(Stage::Archive, missing.name.clone()));
        }

        let output = ctx.intermediate("payload.tar");
        let names = write_archive(&entries, &output)
            .map_err(|e| e.in_stage(Stage::Archive, output.display().to_string()))?;
        ctx.set_entries(names);
        Ok(ctx.complete(Stage::Archive, output))
    }

    fn branch_filter(&self, ctx: BuildContext, compressor: &dyn Compressor) -> Result<BuildContext> {
        if !self.settings.compression.branch_filter || !compressor.benefits_from_branch_filter() {
            log::debug!("branch filter skipped for {} compression", compressor.name());
            return Ok(ctx);
        }
        let input = ctx.current().context("no archive to filter")?.to_path_buf();
        let output = ctx.intermediate("payload.tar.bcj");
        let filter = || -> Result<()> {
            let archive = std::fs::read(&input).fs_context("reading archive", &input)?;
            let filtered = branch_filter::encode(&archive)?;
            log::debug!("branch filter: {} -> {} bytes", archive.len(), filtered.len());
            std::fs::write(&output, filtered).fs_context("writing filtered archive", &output)
        };
        filter().map_err(|e| e.in_stage(Stage::BranchFilter, input.display().to_string()))?;
        Ok(ctx.complete(Stage::BranchFilter, output))
    }

    fn compress(&self, ctx: BuildContext, compressor: &dyn Compressor) -> Result<BuildContext> {
        let input = ctx.current().context("no archive to compress")?.to_path_buf();
        let output = ctx.intermediate("payload.packed");
        let written = compressor
            .compress(&input, &output)
            .map_err(|e| e.in_stage(Stage::Compress, input.display().to_string()))?;
        Ok(ctx.complete(Stage::Compress, written))
    }

    fn embed_resources(&self, ctx: BuildContext, runner: &dyn ProcessRunner) -> Result<BuildContext> {
        let payload = ctx.current().context("no compressed payload")?.to_path_buf();
        let description = ctx.intermediate("payload.rc");
        let container = ctx.intermediate("payload_resources.dll");

        let run = || -> Result<PathBuf> {
            let text = render_description(&ResourceInputs {
                payload: payload.clone(),
                manifest: self.settings.manifest.clone(),
                resource_header: self.settings.resource_header.clone(),
            })?;
            std::fs::write(&description, text).fs_context("writing resource description", &description)?;

            let resources = &self.settings.resources;
            match resources.compiler {
                ResourceCompilerKind::Packed => PackedResourceCompiler.compile(&description, &container),
                ResourceCompilerKind::External => {
                    ExternalResourceCompiler::new(runner, &resources.rc_program, &resources.link_program)
                        .compile(&description, &container)
                }
            }
        };
        let written = run().map_err(|e| e.in_stage(Stage::ResourceEmbed, description.display().to_string()))?;
        Ok(ctx.complete(Stage::ResourceEmbed, written))
    }

    fn merge_stub(&self, ctx: BuildContext, name: &str) -> Result<BuildContext> {
        let container = ctx.current().context("no resource container")?.to_path_buf();
        let stem = name.strip_suffix(".exe").unwrap_or(name);
        let output = ctx.intermediate(&SignedFileInfo::new(stem, "exe", None).unsigned_filename);
        let stub = &self.settings.stub;
        let written = merge_files(stub, &container, &output)
            .map_err(|e| e.in_stage(Stage::StubMerge, stub.display().to_string()))?;
        Ok(ctx.complete(Stage::StubMerge, written))
    }

    fn sign(&self, mut ctx: BuildContext, name: &str) -> Result<BuildContext> {
        let unsigned = ctx.current().context("no merged installer")?.to_path_buf();
        let output = ctx.intermediate(name);
        let signer = SignTool::new(self.runner.as_ref(), self.settings.signing.clone());
        let signed = signer
            .sign(&unsigned, &output)
            .map_err(|e| e.in_stage(Stage::Sign, name.to_string()))?;
        if signed {
            ctx.mark_signed();
        }
        Ok(ctx.complete(Stage::Sign, output))
    }

    fn reserve_tag(&self, ctx: BuildContext) -> Result<BuildContext> {
        if !self.settings.tagging.reserve {
            return Ok(ctx);
        }
        if !ctx.is_signed() {
            log::warn!("Installer is unsigned; skipping tag region reservation");
            return Ok(ctx);
        }
        let input = ctx.current().context("no signed installer")?.to_path_buf();
        let output = ctx.intermediate("reserved.exe");
        let tagger = BinaryTagger::from_settings(&self.settings.tagging);
        let reserve = || -> Result<()> {
            let signed = std::fs::read(&input).fs_context("reading signed installer", &input)?;
            let reserved = tagger.reserve(&signed)?;
            std::fs::write(&output, reserved).fs_context("writing reserved installer", &output)?;
            Ok(())
        };
        reserve().map_err(|e| e.in_stage(Stage::ReserveTag, format!("{} byte budget", tagger.budget())))?;
        Ok(ctx.complete(Stage::ReserveTag, output))
    }

    fn contents_log(&self, ctx: &BuildContext) -> Result<String> {
        let mut log = format!("*** Omaha Version ***\n\n{}\n", ctx.version());
        log.push_str("\n\n*** Payload ***\n\n");
        for entry in ctx.entries() {
            log.push_str(entry);
            log.push('\n');
        }
        for app in &self.settings.offline_apps {
            let manifest = std::fs::read_to_string(&app.manifest).fs_context("reading app manifest", &app.manifest)?;
            log.push_str(&format!(
                "\n\n*** App: {} ***\n\nINSTALLER:\n{}\n\nMANIFEST:\n{}",
                app.app_guid,
                app.installer.display(),
                manifest
            ));
        }
        Ok(log)
    }

    fn publish(&self, ctx: BuildContext, output_dir: &Path, name: &str) -> Result<BundledArtifact> {
        let Some(source) = ctx.current().map(Path::to_path_buf) else {
            bail!("pipeline produced no installer for {}", name);
        };
        let target = output_dir.join(name);
        let stem = name.strip_suffix(".exe").unwrap_or(name);
        let log_path = output_dir.join(format!("{stem}_Contents.txt"));

        let publish = || -> Result<BundledArtifact> {
            copy_atomic(&source, &target)?;
            write_atomic(&log_path, self.contents_log(&ctx)?.as_bytes())?;

            let bytes = std::fs::read(&target).fs_context("reading published installer", &target)?;
            let capacity = if ctx.is_signed() {
                tag_capacity(&bytes).ok().flatten()
            } else {
                None
            };
            Ok(BundledArtifact {
                name: name.to_string(),
                path: target.clone(),
                version: ctx.version().to_string(),
                size: bytes.len() as u64,
                checksum: sha256_file(&target)?,
                signed: ctx.is_signed(),
                tag_capacity: capacity,
                entries: ctx.entries().to_vec(),
                contents_log: log_path.clone(),
            })
        };
        let artifact = publish().map_err(|e| e.in_stage(Stage::Publish, target.display().to_string()))?;
        log::info!(
            "Published {} ({} bytes, sha256 {})",
            artifact.path.display(),
            artifact.size,
            artifact.checksum
        );
        Ok(artifact)
    }
}
