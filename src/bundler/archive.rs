//! Deterministic payload archive.
//!
//! Headers carry no timestamps, owners or host permissions, so the same
//! inputs always produce the same archive bytes. Entries keep the order of
//! the resolved payload list. A recognised test prefix is stripped from
//! entry names so test and production payloads share one layout.

use crate::bundler::error::{Context, ErrorExt};
use crate::bundler::Result;
use crate::version::RECOGNIZED_TEST_PREFIXES;
use std::io::Read;
use std::path::{Path, PathBuf};

/// A file to place in the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// File to read
    pub source: PathBuf,
    /// Name inside the archive
    pub name: String,
}

/// An app installer shipped inside an offline (standalone) payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineApp {
    /// App GUID, including braces
    pub app_guid: String,
    /// Installer binary
    pub installer: PathBuf,
    /// Update response manifest for the app
    pub manifest: PathBuf,
}

/// Name of `filename` inside the archive.
pub fn entry_name(filename: &str) -> String {
    RECOGNIZED_TEST_PREFIXES
        .iter()
        .find_map(|prefix| filename.strip_prefix(prefix))
        .unwrap_or(filename)
        .to_string()
}

/// Entries for the resolved payload `files`, read from `source_dir`.
pub fn payload_entries(source_dir: &Path, files: &[String]) -> Vec<ArchiveEntry> {
    files
        .iter()
        .map(|file| ArchiveEntry {
            source: source_dir.join(file),
            name: entry_name(file),
        })
        .collect()
}

/// Entries for offline app installers: `{installer}.{guid}` then `{guid}.gup`.
pub fn offline_entries(apps: &[OfflineApp]) -> Result<Vec<ArchiveEntry>> {
    let mut entries = Vec::with_capacity(apps.len() * 2);
    for app in apps {
        let base = app
            .installer
            .file_name()
            .with_context(|| format!("installer path {} has no file name", app.installer.display()))?
            .to_string_lossy();
        entries.push(ArchiveEntry {
            source: app.installer.clone(),
            name: format!("{}.{}", base, app.app_guid),
        });
        entries.push(ArchiveEntry {
            source: app.manifest.clone(),
            name: format!("{}.gup", app.app_guid),
        });
    }
    Ok(entries)
}

/// Builds the archive in memory.
pub fn build_archive(entries: &[ArchiveEntry]) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.mode(tar::HeaderMode::Deterministic);

    for entry in entries {
        let data = std::fs::read(&entry.source).fs_context("reading payload file", &entry.source)?;

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        builder.append_data(&mut header, &entry.name, data.as_slice())?;
        log::debug!("archived {} ({} bytes)", entry.name, data.len());
    }

    Ok(builder.into_inner()?)
}

/// Builds the archive and writes it to `output`.
///
/// Returns the entry names in archive order.
pub fn write_archive(entries: &[ArchiveEntry], output: &Path) -> Result<Vec<String>> {
    let bytes = build_archive(entries)?;
    std::fs::write(output, bytes).fs_context("writing archive", output)?;
    Ok(entries.iter().map(|e| e.name.clone()).collect())
}

/// Reads every regular entry of an archive, in order.
pub fn read_archive(bytes: &[u8]) -> Result<Vec<(String, Vec<u8>)>> {
    let mut archive = tar::Archive::new(bytes);
    let mut files = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type() != tar::EntryType::Regular {
            continue;
        }
        let name = entry.path()?.to_string_lossy().into_owned();
        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        files.push((name, data));
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_files(dir: &Path, files: &[(&str, &[u8])]) -> Vec<String> {
        for (name, data) in files {
            std::fs::write(dir.join(name), data).unwrap();
        }
        files.iter().map(|(name, _)| name.to_string()).collect()
    }

    #[test]
    fn test_entry_name_strips_test_prefix() {
        assert_eq!(entry_name("TEST_goopdate.dll"), "goopdate.dll");
        assert_eq!(entry_name("goopdate.dll"), "goopdate.dll");
        assert_eq!(entry_name("OTHER_goopdate.dll"), "OTHER_goopdate.dll");
    }

    #[test]
    fn test_archive_is_deterministic_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_files(dir.path(), &[("b.exe", &b"second"[..]), ("a.dll", &b"first"[..])]);
        let entries = payload_entries(dir.path(), &files);

        let first = build_archive(&entries).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(dir.path().join("b.exe"), b"second").unwrap();
        let second = build_archive(&entries).unwrap();
        assert_eq!(first, second);

        let read = read_archive(&first).unwrap();
        let names: Vec<&str> = read.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["b.exe", "a.dll"]);
        assert_eq!(read[1].1, b"first");
    }

    #[test]
    fn test_test_and_production_archives_match() {
        let dir = tempfile::tempdir().unwrap();
        let prod = write_files(dir.path(), &[("goopdate.dll", &b"payload"[..])]);
        let test = write_files(dir.path(), &[("TEST_goopdate.dll", &b"payload"[..])]);
        assert_eq!(
            build_archive(&payload_entries(dir.path(), &prod)).unwrap(),
            build_archive(&payload_entries(dir.path(), &test)).unwrap()
        );
    }

    #[test]
    fn test_offline_entries_naming() {
        let apps = [OfflineApp {
            app_guid: "{8A69D345-D564-463C-AFF1-A69D9E530F96}".to_string(),
            installer: PathBuf::from("/installers/chrome_installer.exe"),
            manifest: PathBuf::from("/manifests/chrome.gup"),
        }];
        let entries = offline_entries(&apps).unwrap();
        assert_eq!(
            entries[0].name,
            "chrome_installer.exe.{8A69D345-D564-463C-AFF1-A69D9E530F96}"
        );
        assert_eq!(entries[1].name, "{8A69D345-D564-463C-AFF1-A69D9E530F96}.gup");
    }

    #[test]
    fn test_missing_payload_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let entries = payload_entries(dir.path(), &["missing.dll".to_string()]);
        let err = build_archive(&entries).unwrap_err();
        assert!(err.to_string().contains("missing.dll"));
    }
}
