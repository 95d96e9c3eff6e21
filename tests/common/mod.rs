//! Shared fixtures for integration tests.

#![allow(dead_code)]

use omaha_packager::payload::resolve_files_for_languages;
use omaha_packager::version::parse_version_text;
use std::path::{Path, PathBuf};

pub const VERSION_TEXT: &str = "\
# Release version
version_major = 1
version_minor = 3
version_build = 99
version_patch = 5
update_plugin_version = 3
";

pub const LANGUAGES: [&str; 2] = ["en", "fr"];

/// Staging directory holding a stub, a version file and every payload file
/// for `prefix`.
pub struct Staging {
    pub dir: tempfile::TempDir,
}

impl Staging {
    pub fn new(prefix: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let staging = Self { dir };
        std::fs::create_dir_all(staging.payload_dir()).unwrap();
        std::fs::write(staging.version_file(), VERSION_TEXT).unwrap();
        std::fs::write(staging.stub(), unsigned_pe()).unwrap();
        staging.stage_payload(prefix);
        staging
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn payload_dir(&self) -> PathBuf {
        self.root().join("staging")
    }

    pub fn version_file(&self) -> PathBuf {
        self.root().join("VERSION")
    }

    pub fn stub(&self) -> PathBuf {
        self.root().join("mi_exe_stub.exe")
    }

    pub fn output(&self) -> PathBuf {
        self.root().join("out")
    }

    /// Writes every payload file resolved for `prefix`.
    ///
    /// Test builds resolve the bumped version, whose file names are the
    /// same apart from the prefix.
    pub fn stage_payload(&self, prefix: &str) {
        let version = parse_version_text(VERSION_TEXT, "VERSION").unwrap();
        for name in resolve_files_for_languages(prefix, &version, &LANGUAGES).unwrap() {
            std::fs::write(self.payload_dir().join(&name), file_contents(&name)).unwrap();
        }
    }

    /// Writes `packager.toml` with `extra` appended and returns its path.
    pub fn write_settings(&self, extra: &str) -> PathBuf {
        let path = self.root().join("packager.toml");
        let text = format!(
            "payload_dir = \"staging\"\n\
             stub = \"mi_exe_stub.exe\"\n\
             installer_name = \"GoogleUpdateSetup\"\n\
             languages = [\"en\", \"fr\"]\n\
             workers = 2\n\
             {extra}"
        );
        std::fs::write(&path, text).unwrap();
        path
    }
}

/// Contents written for a staged payload file: text plus x86-looking
/// call and jump bytes so the branch filter has work to do.
pub fn file_contents(name: &str) -> Vec<u8> {
    let mut data = format!("contents of {name}\n").into_bytes();
    for i in 0..64u32 {
        data.push(0xE8);
        data.extend_from_slice(&(i * 16).to_le_bytes());
        data.push(0x90);
    }
    data
}

fn directories(pe32_plus: bool) -> usize {
    0x40 + 4 + 20 + if pe32_plus { 112 } else { 96 }
}

fn pe_image(pe32_plus: bool) -> Vec<u8> {
    let mut bin = vec![0u8; 0x200];
    bin[0..2].copy_from_slice(b"MZ");
    bin[0x3c..0x40].copy_from_slice(&0x40u32.to_le_bytes());
    bin[0x40..0x44].copy_from_slice(b"PE\0\0");

    let coff = 0x44;
    let machine: u16 = if pe32_plus { 0x8664 } else { 0x14c };
    bin[coff..coff + 2].copy_from_slice(&machine.to_le_bytes());
    let optional_len: u16 = if pe32_plus { 240 } else { 224 };
    bin[coff + 16..coff + 18].copy_from_slice(&optional_len.to_le_bytes());

    let optional = coff + 20;
    let magic: u16 = if pe32_plus { 0x20b } else { 0x10b };
    bin[optional..optional + 2].copy_from_slice(&magic.to_le_bytes());
    let count_at = directories(pe32_plus) - 4;
    bin[count_at..count_at + 4].copy_from_slice(&16u32.to_le_bytes());
    bin[0x180..0x190].copy_from_slice(b"stub code bytes!");
    bin
}

/// A PE32+ image with an empty certificate directory.
pub fn unsigned_pe() -> Vec<u8> {
    pe_image(true)
}

/// A PE image whose certificate table holds a `body_len`-byte DER
/// SEQUENCE, like a freshly signed binary.
pub fn signed_pe(pe32_plus: bool, body_len: u16) -> Vec<u8> {
    let mut bin = pe_image(pe32_plus);
    let offset = bin.len();

    let mut der = vec![0x30, 0x82];
    der.extend_from_slice(&body_len.to_be_bytes());
    der.extend((0..usize::from(body_len)).map(|i| (i * 7 % 256) as u8));

    let mut size = 8 + der.len();
    size += (8 - size % 8) % 8;
    bin.extend_from_slice(&(size as u32).to_le_bytes());
    bin.extend_from_slice(&0x200u16.to_le_bytes());
    bin.extend_from_slice(&2u16.to_le_bytes());
    bin.extend_from_slice(&der);
    bin.resize(offset + size, 0);

    let entry = directories(pe32_plus) + 4 * 8;
    bin[entry..entry + 4].copy_from_slice(&(offset as u32).to_le_bytes());
    bin[entry + 4..entry + 8].copy_from_slice(&(size as u32).to_le_bytes());
    bin
}
