//! Explicit state threaded through the assembly pipeline.
//!
//! Each stage takes the [`BuildContext`] by value and returns it with its
//! own output recorded, so stage N+1 always sees the closed file written
//! by stage N.

use crate::version::VersionDescriptor;
use std::fmt;
use std::path::{Path, PathBuf};

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Version-gated payload resolution
    Resolve,
    /// Deterministic tar archive
    Archive,
    /// Branch/call/jump byte separation
    BranchFilter,
    /// Single-file compression
    Compress,
    /// Resource description render and compile
    ResourceEmbed,
    /// Resource container appended to the stub
    StubMerge,
    /// External code signing
    Sign,
    /// Certificate-table tag region reservation
    ReserveTag,
    /// Temp-then-rename publication of the final artifact
    Publish,
    /// Per-deployment tag embedding
    Tag,
}

impl Stage {
    /// Stable lowercase name used in logs and diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Resolve => "resolve",
            Stage::Archive => "archive",
            Stage::BranchFilter => "branch-filter",
            Stage::Compress => "compress",
            Stage::ResourceEmbed => "resource-embed",
            Stage::StubMerge => "stub-merge",
            Stage::Sign => "sign",
            Stage::ReserveTag => "reserve-tag",
            Stage::Publish => "publish",
            Stage::Tag => "tag",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file produced by a completed stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRecord {
    /// Stage that produced the file
    pub stage: Stage,
    /// Path of the produced file
    pub output: PathBuf,
}

/// State passed to and returned from every pipeline stage.
#[derive(Debug, Clone)]
pub struct BuildContext {
    version: VersionDescriptor,
    work_dir: PathBuf,
    current: Option<PathBuf>,
    entries: Vec<String>,
    signed: bool,
    records: Vec<StageRecord>,
}

impl BuildContext {
    /// Starts a context for `version` whose intermediates live in `work_dir`.
    pub fn new(version: VersionDescriptor, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            version,
            work_dir: work_dir.into(),
            current: None,
            entries: Vec::new(),
            signed: false,
            records: Vec::new(),
        }
    }

    /// Version being built.
    pub fn version(&self) -> &VersionDescriptor {
        &self.version
    }

    /// Directory holding stage intermediates.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Path of an intermediate file named `name` in the work directory.
    pub fn intermediate(&self, name: &str) -> PathBuf {
        self.work_dir.join(name)
    }

    /// Output of the most recent stage.
    pub fn current(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    /// Archive entry names, in archive order.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Records the archive entry names.
    pub fn set_entries(&mut self, entries: Vec<String>) {
        self.entries = entries;
    }

    /// Whether the current artifact has been signed.
    pub fn is_signed(&self) -> bool {
        self.signed
    }

    /// Marks the current artifact as signed.
    pub fn mark_signed(&mut self) {
        self.signed = true;
    }

    /// Records the closed output of `stage` and makes it current.
    pub fn complete(mut self, stage: Stage, output: impl Into<PathBuf>) -> Self {
        let output = output.into();
        log::debug!("stage {} wrote {}", stage, output.display());
        self.current = Some(output.clone());
        self.records.push(StageRecord { stage, output });
        self
    }

    /// Stages completed so far, in order.
    pub fn records(&self) -> &[StageRecord] {
        &self.records
    }

    /// Output of `stage`, if it ran.
    pub fn output_of(&self, stage: Stage) -> Option<&Path> {
        self.records
            .iter()
            .rev()
            .find(|r| r.stage == stage)
            .map(|r| r.output.as_path())
    }
}
