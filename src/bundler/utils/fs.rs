//! File system utilities for publishing artifacts.
//!
//! Final artifacts never appear half-written under their target name: data
//! goes to a temp file in the destination directory, which is then renamed
//! over the target.

use crate::bundler::error::{Error, ErrorExt, Result};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

fn parent_dir(path: &Path) -> Result<&Path> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).fs_context("creating output directory", parent)?;
    Ok(parent)
}

/// Writes `contents` to `path` through a temp file and rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = parent_dir(path)?;
    let mut temp = NamedTempFile::new_in(parent).fs_context("creating temp file", parent)?;
    temp.write_all(contents).fs_context("writing temp file", temp.path())?;
    temp.as_file().sync_all().fs_context("syncing temp file", temp.path())?;
    temp.persist(path)?;
    Ok(())
}

/// Copies a regular file to `to` through a temp file and rename.
///
/// Fails if the source path is a directory or doesn't exist.
pub fn copy_atomic(from: &Path, to: &Path) -> Result<()> {
    if !from.is_file() {
        return Err(Error::GenericError(format!("{} is not a file", from.display())));
    }
    let parent = parent_dir(to)?;
    let mut temp = NamedTempFile::new_in(parent).fs_context("creating temp file", parent)?;
    let mut source = std::fs::File::open(from).fs_context("opening file to copy", from)?;
    std::io::copy(&mut source, temp.as_file_mut()).fs_context("copying into temp file", temp.path())?;
    temp.persist(to)?;
    Ok(())
}

/// SHA-256 of a file as lowercase hex.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).fs_context("opening file for checksum", path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = file.read(&mut buffer).fs_context("reading file for checksum", path)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
