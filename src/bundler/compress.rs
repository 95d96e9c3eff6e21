//! Single-file payload compression.

use crate::bundler::error::ErrorExt;
use crate::bundler::process::{ProcessRunner, ToolCommand, run_tool};
use crate::bundler::settings::{CompressionKind, CompressionSettings};
use crate::bundler::Result;
use flate2::{Compression, GzBuilder};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// gzip member magic.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Compresses one file into another.
pub trait Compressor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Whether the branch filter improves this compressor's ratio.
    fn benefits_from_branch_filter(&self) -> bool;

    /// Compresses `input` into `output`.
    fn compress(&self, input: &Path, output: &Path) -> Result<PathBuf>;
}

/// gzip with a fixed header (no name, zero mtime).
#[derive(Debug, Clone, Copy)]
pub struct GzipCompressor {
    level: u32,
}

impl GzipCompressor {
    /// Compressor at `level` (0-9, clamped).
    pub fn new(level: u32) -> Self {
        Self { level: level.min(9) }
    }

    /// Compresses `data` in memory.
    pub fn compress_bytes(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzBuilder::new()
            .mtime(0)
            .write(Vec::new(), Compression::new(self.level));
        encoder.write_all(data)?;
        Ok(encoder.finish()?)
    }
}

impl Compressor for GzipCompressor {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn benefits_from_branch_filter(&self) -> bool {
        true
    }

    fn compress(&self, input: &Path, output: &Path) -> Result<PathBuf> {
        let data = std::fs::read(input).fs_context("reading compressor input", input)?;
        let compressed = self.compress_bytes(&data)?;
        std::fs::write(output, &compressed).fs_context("writing compressed payload", output)?;
        log::debug!(
            "gzip level {}: {} -> {} bytes",
            self.level,
            data.len(),
            compressed.len()
        );
        Ok(output.to_path_buf())
    }
}

/// Copies the input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreCompressor;

impl Compressor for StoreCompressor {
    fn name(&self) -> &'static str {
        "store"
    }

    fn benefits_from_branch_filter(&self) -> bool {
        false
    }

    fn compress(&self, input: &Path, output: &Path) -> Result<PathBuf> {
        std::fs::copy(input, output).fs_context("copying uncompressed payload", output)?;
        Ok(output.to_path_buf())
    }
}

/// Delegates to an external compressor through the process boundary.
///
/// Arguments may use `{input}` and `{output}` placeholders.
pub struct ExternalCompressor<'a> {
    runner: &'a dyn ProcessRunner,
    program: String,
    args: Vec<String>,
}

impl<'a> ExternalCompressor<'a> {
    /// Compressor running `program` with templated `args`.
    pub fn new(runner: &'a dyn ProcessRunner, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            runner,
            program: program.into(),
            args,
        }
    }
}

impl Compressor for ExternalCompressor<'_> {
    fn name(&self) -> &'static str {
        "external"
    }

    fn benefits_from_branch_filter(&self) -> bool {
        true
    }

    fn compress(&self, input: &Path, output: &Path) -> Result<PathBuf> {
        let values = HashMap::from([
            ("input", input.to_string_lossy().into_owned()),
            ("output", output.to_string_lossy().into_owned()),
        ]);
        let command = ToolCommand::new(&self.program).templated_args(&self.args, &values);
        run_tool(self.runner, &command, output)
    }
}

/// Builds the compressor selected by `settings`.
pub fn from_settings<'a>(
    settings: &CompressionSettings,
    runner: &'a dyn ProcessRunner,
) -> Box<dyn Compressor + 'a> {
    match settings.kind {
        CompressionKind::Gzip => Box::new(GzipCompressor::new(settings.level)),
        CompressionKind::Store => Box::new(StoreCompressor),
        CompressionKind::External => Box::new(ExternalCompressor::new(
            runner,
            settings.program.clone(),
            settings.args.clone(),
        )),
    }
}

/// Inflates a gzip payload, passing other data through unchanged.
pub fn decompress_payload(data: &[u8]) -> Result<Vec<u8>> {
    if !data.starts_with(&GZIP_MAGIC) {
        return Ok(data.to_vec());
    }
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::process::testing::RecordingRunner;

    #[test]
    fn test_gzip_is_deterministic_and_reversible() {
        let data = b"GoogleUpdate.exe goopdate.dll ".repeat(64);
        let gz = GzipCompressor::new(9);
        let a = gz.compress_bytes(&data).unwrap();
        let b = gz.compress_bytes(&data).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with(&GZIP_MAGIC));
        assert!(a.len() < data.len());
        assert_eq!(decompress_payload(&a).unwrap(), data);
    }

    #[test]
    fn test_store_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("payload.tar");
        let output = dir.path().join("payload.bin");
        std::fs::write(&input, b"raw").unwrap();
        assert!(!StoreCompressor.benefits_from_branch_filter());
        StoreCompressor.compress(&input, &output).unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"raw");
        assert_eq!(decompress_payload(b"raw").unwrap(), b"raw");
    }

    #[test]
    fn test_external_substitutes_paths() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.tar");
        let output = dir.path().join("out.lz");
        let runner = RecordingRunner {
            produce: Some((output.clone(), b"lz".to_vec())),
            ..Default::default()
        };
        let compressor = ExternalCompressor::new(
            &runner,
            "lzma",
            vec!["e".into(), "{input}".into(), "{output}".into()],
        );
        compressor.compress(&input, &output).unwrap();

        let commands = runner.commands.lock().unwrap();
        assert_eq!(commands[0].program(), "lzma");
        assert_eq!(commands[0].arguments()[1], input.to_string_lossy());
        assert_eq!(commands[0].arguments()[2], output.to_string_lossy());
    }
}
