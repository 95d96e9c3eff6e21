//! Signature-preserving binary tagging.
//!
//! Two tag placements exist and they are not interchangeable; the bootstrap
//! decides at runtime which one it looks for.
//!
//! | Placement | Layout | Signature |
//! |-----------|--------|-----------|
//! | Certificate table | `magic \| u16 BE len \| payload \| zeros` inside the padding after the PKCS#7 blob | stays valid |
//! | Appended | `binary \| magic \| u16 BE len \| payload` | not covered |
//!
//! The certificate-table region is sized once with [`BinaryTagger::reserve`]
//! after signing, then filled per deployment with [`BinaryTagger::tag`]
//! without changing the file length.

pub mod bundle;
pub mod pe;
pub mod tag_string;

pub use bundle::{
    Bundle, BundleApp, TaggedBundle, bundles_folder, is_test_installer, parse_bundles, tag_bundles, tag_bundles_file,
};
pub use tag_string::TagString;

use crate::bundler::ErrorExt;
use crate::bundler::{DEFAULT_TAG_BUDGET, TaggingSettings};
use crate::bundler::utils::fs::write_atomic;
use crate::error::TagError;
use pe::{CertificateTable, PeSignature};
use serde::Serialize;
use std::path::Path;

/// Marker preceding every tag.
pub const TAG_MAGIC: &[u8] = b"Gact2.0Omaha";

/// Largest payload a 2-byte length can describe.
pub const MAX_TAG_LEN: usize = 0xFFFF;

const MSI_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Container format of a taggable file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryFormat {
    /// PE32 or PE32+ image
    Pe,
    /// Compound-file installer package
    Msi,
}

/// Where a tag was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TagPlacement {
    /// Inside the certificate table padding
    CertificateTable,
    /// Concatenated after the binary
    Appended,
}

impl std::fmt::Display for TagPlacement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TagPlacement::CertificateTable => write!(f, "certificate table"),
            TagPlacement::Appended => write!(f, "appended"),
        }
    }
}

/// What to do with a PE image that carries no signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignaturePolicy {
    /// Refuse to tag
    #[default]
    RequireSigned,
    /// Fall back to an appended tag and log a warning
    AllowUnsigned,
}

/// Tagged output.
#[derive(Debug, Clone)]
pub struct Tagged {
    /// Tagged binary
    pub bytes: Vec<u8>,
    /// Where the tag went
    pub placement: TagPlacement,
}

/// First index of `pattern` in `data`.
fn find_pattern(data: &[u8], pattern: &[u8]) -> Option<usize> {
    data.windows(pattern.len()).position(|window| window == pattern)
}

/// Last index of `pattern` in `data`.
fn rfind_pattern(data: &[u8], pattern: &[u8]) -> Option<usize> {
    data.windows(pattern.len()).rposition(|window| window == pattern)
}

/// Detects the container format from the first 16 bytes.
pub fn sniff_format(binary: &[u8]) -> Result<BinaryFormat, TagError> {
    let hint_bytes: &[u8; 16] = binary
        .get(0..16)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| TagError::UnsupportedFormat {
            format: format!("{} byte file", binary.len()),
        })?;

    if hint_bytes[..8] == MSI_MAGIC {
        return Ok(BinaryFormat::Msi);
    }
    match goblin::peek_bytes(hint_bytes) {
        Ok(goblin::Hint::PE) => Ok(BinaryFormat::Pe),
        Ok(goblin::Hint::Elf(_)) => Err(TagError::UnsupportedFormat { format: "ELF".into() }),
        Ok(goblin::Hint::Mach(_)) | Ok(goblin::Hint::MachFat(_)) => {
            Err(TagError::UnsupportedFormat { format: "Mach-O".into() })
        }
        Ok(goblin::Hint::Archive) => Err(TagError::UnsupportedFormat { format: "ar archive".into() }),
        Ok(_) | Err(_) => Err(TagError::UnsupportedFormat { format: "unknown".into() }),
    }
}

/// A located certificate-table tag region.
#[derive(Debug, Clone, Copy)]
struct Region {
    /// Absolute offset of the u16 length field
    len_at: usize,
    /// Bytes available for the payload
    capacity: usize,
}

impl Region {
    fn find(binary: &[u8], table: &CertificateTable) -> Option<Self> {
        let start = table.padding_start();
        let padding = &binary[start..table.end()];
        let len_at = find_pattern(padding, TAG_MAGIC)? + TAG_MAGIC.len();
        let capacity = padding.len().checked_sub(len_at + 2)?;
        Some(Self {
            len_at: start + len_at,
            capacity,
        })
    }

    fn read<'a>(&self, binary: &'a [u8]) -> Option<&'a [u8]> {
        let len = usize::from(u16::from_be_bytes([binary[self.len_at], binary[self.len_at + 1]]));
        (len <= self.capacity).then(|| &binary[self.len_at + 2..self.len_at + 2 + len])
    }
}

fn signed_table(binary: &[u8]) -> Result<CertificateTable, TagError> {
    match sniff_format(binary)? {
        BinaryFormat::Pe => {}
        BinaryFormat::Msi => {
            return Err(TagError::UnsupportedFormat {
                format: "MSI packages take appended tags only".into(),
            });
        }
    }
    match pe::inspect(binary)? {
        PeSignature::Signed(table) => Ok(table),
        PeSignature::Unsigned => Err(TagError::Unsigned {
            reason: "PE image has no certificate table".into(),
        }),
    }
}

fn check_wire_len(payload: &[u8]) -> Result<(), TagError> {
    if payload.len() > MAX_TAG_LEN {
        return Err(TagError::TagTooLarge {
            len: payload.len(),
            capacity: MAX_TAG_LEN,
        });
    }
    Ok(())
}

/// Returns the binary without a trailing appended tag.
pub fn strip_appended_tag(binary: &[u8]) -> &[u8] {
    match trailing_tag(binary) {
        Some((magic_at, _)) => &binary[..magic_at],
        None => binary,
    }
}

/// Finds an appended tag that ends exactly at EOF.
fn trailing_tag(binary: &[u8]) -> Option<(usize, &[u8])> {
    let mut end = binary.len();
    while let Some(at) = rfind_pattern(&binary[..end], TAG_MAGIC) {
        let len_at = at + TAG_MAGIC.len();
        if let Some(raw) = binary.get(len_at..len_at + 2) {
            let len = usize::from(u16::from_be_bytes([raw[0], raw[1]]));
            if len_at + 2 + len == binary.len() {
                return Some((at, &binary[len_at + 2..]));
            }
        }
        end = len_at - 1;
    }
    None
}

/// Appends `payload` after the binary, replacing an existing appended tag.
pub fn append_tag(binary: &[u8], payload: &[u8]) -> Result<Vec<u8>, TagError> {
    check_wire_len(payload)?;
    let base = strip_appended_tag(binary);
    let mut out = Vec::with_capacity(base.len() + TAG_MAGIC.len() + 2 + payload.len());
    out.extend_from_slice(base);
    out.extend_from_slice(TAG_MAGIC);
    // Bounded by check_wire_len.
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Reads the embedded tag: certificate region first, then a trailing tag.
pub fn extract_tag(binary: &[u8]) -> Option<Vec<u8>> {
    if let Ok(BinaryFormat::Pe) = sniff_format(binary)
        && let Ok(PeSignature::Signed(table)) = pe::inspect(binary)
        && let Some(payload) = Region::find(binary, &table).and_then(|region| region.read(binary))
    {
        return Some(payload.to_vec());
    }
    trailing_tag(binary).map(|(_, payload)| payload.to_vec())
}

/// Payload capacity of a signed binary's reserved region, if it has one.
pub fn tag_capacity(binary: &[u8]) -> Result<Option<usize>, TagError> {
    let table = signed_table(binary)?;
    Ok(Region::find(binary, &table).map(|region| region.capacity))
}

/// Writes tags into binaries.
#[derive(Debug, Clone)]
pub struct BinaryTagger {
    budget: usize,
    policy: SignaturePolicy,
    reserve_missing: bool,
}

impl Default for BinaryTagger {
    fn default() -> Self {
        Self::new(DEFAULT_TAG_BUDGET)
    }
}

impl BinaryTagger {
    /// Tagger reserving `budget` payload bytes when a region is missing.
    pub fn new(budget: usize) -> Self {
        Self {
            budget: budget.min(MAX_TAG_LEN),
            policy: SignaturePolicy::RequireSigned,
            reserve_missing: true,
        }
    }

    /// Tagger configured from build settings.
    pub fn from_settings(settings: &TaggingSettings) -> Self {
        let policy = if settings.allow_unsigned {
            SignaturePolicy::AllowUnsigned
        } else {
            SignaturePolicy::RequireSigned
        };
        Self::new(settings.budget)
            .with_policy(policy)
            .reserve_missing(settings.reserve)
    }

    /// Sets the unsigned-binary policy.
    pub fn with_policy(mut self, policy: SignaturePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Whether `tag` reserves a region when none exists.
    pub fn reserve_missing(mut self, reserve: bool) -> Self {
        self.reserve_missing = reserve;
        self
    }

    /// Reserved payload budget.
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Pads the certificate table of a signed PE with an empty tag region.
    ///
    /// A binary whose region already holds at least the budget is returned
    /// unchanged.
    pub fn reserve(&self, binary: &[u8]) -> Result<Vec<u8>, TagError> {
        let table = signed_table(binary)?;
        if let Some(region) = Region::find(binary, &table)
            && region.capacity >= self.budget
        {
            return Ok(binary.to_vec());
        }

        // Leading zeros keep the table 8-byte aligned so the capacity is
        // exactly the budget.
        let body = TAG_MAGIC.len() + 2 + self.budget;
        let align = (8 - (table.der_len + body) % 8) % 8;
        let mut padding = vec![0u8; align];
        padding.extend_from_slice(TAG_MAGIC);
        padding.resize(align + body, 0);

        log::debug!(
            "reserving {} byte tag region after {} byte PKCS#7 blob",
            padding.len(),
            table.der_len
        );
        pe::with_padding(binary, &table, &padding)
    }

    /// Tags `binary` with `payload`, choosing the placement from the
    /// binary's format and signature.
    pub fn tag(&self, binary: &[u8], payload: &[u8]) -> Result<Tagged, TagError> {
        check_wire_len(payload)?;

        if sniff_format(binary)? == BinaryFormat::Msi {
            return self.appended(binary, payload);
        }
        match pe::inspect(binary)? {
            PeSignature::Signed(table) => self.in_certificate(binary, &table, payload),
            PeSignature::Unsigned => match self.policy {
                SignaturePolicy::RequireSigned => Err(TagError::Unsigned {
                    reason: "tagging requires a signed binary".into(),
                }),
                SignaturePolicy::AllowUnsigned => {
                    log::warn!(
                        "Binary is unsigned; writing an appended tag of {} bytes for diagnostics",
                        payload.len()
                    );
                    self.appended(binary, payload)
                }
            },
        }
    }

    /// Tags with the appended placement regardless of format.
    pub fn appended(&self, binary: &[u8], payload: &[u8]) -> Result<Tagged, TagError> {
        Ok(Tagged {
            bytes: append_tag(binary, payload)?,
            placement: TagPlacement::Appended,
        })
    }

    fn in_certificate(&self, binary: &[u8], table: &CertificateTable, payload: &[u8]) -> Result<Tagged, TagError> {
        let region = match Region::find(binary, table) {
            Some(region) => region,
            None if self.reserve_missing => {
                let reserved = self.reserve(binary)?;
                return self.tag(&reserved, payload);
            }
            None => {
                return Err(TagError::NoTagRegion {
                    reason: "certificate table has no reserved padding".into(),
                });
            }
        };
        if payload.len() > region.capacity {
            return Err(TagError::TagTooLarge {
                len: payload.len(),
                capacity: region.capacity,
            });
        }

        let mut bytes = binary.to_vec();
        let start = region.len_at + 2;
        bytes[region.len_at..start].copy_from_slice(&(payload.len() as u16).to_be_bytes());
        bytes[start..start + payload.len()].copy_from_slice(payload);
        bytes[start + payload.len()..start + region.capacity].fill(0);
        Ok(Tagged {
            bytes,
            placement: TagPlacement::CertificateTable,
        })
    }

    /// Tags the file at `input` and publishes the result at `output`.
    pub fn tag_file(
        &self,
        input: &Path,
        output: &Path,
        payload: &[u8],
        placement: Option<TagPlacement>,
    ) -> crate::bundler::Result<TagPlacement> {
        let binary = std::fs::read(input).fs_context("reading binary to tag", input)?;
        let tagged = match placement {
            Some(TagPlacement::Appended) => self.appended(&binary, payload)?,
            _ => self.tag(&binary, payload)?,
        };
        write_atomic(output, &tagged.bytes)?;
        log::info!(
            "Tagged {} ({} byte tag, {})",
            output.display(),
            payload.len(),
            tagged.placement
        );
        Ok(tagged.placement)
    }
}

/// Synthetic PE images for tests.
#[cfg(test)]
pub(crate) mod testing {
    /// Builds a minimal PE image with a certificate table holding a DER
    /// SEQUENCE of `body_len` bytes.
    pub fn signed_pe(pe32_plus: bool, body_len: usize) -> Vec<u8> {
        let mut bin = unsigned_pe(pe32_plus);
        let offset = bin.len();

        let mut der = vec![0x30];
        match body_len {
            0..=0x7f => der.push(body_len as u8),
            0x80..=0xff => der.extend_from_slice(&[0x81, body_len as u8]),
            _ => {
                der.push(0x82);
                der.extend_from_slice(&(body_len as u16).to_be_bytes());
            }
        }
        der.extend((0..body_len).map(|i| (i % 251) as u8));

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

    fn directories(pe32_plus: bool) -> usize {
        0x40 + 4 + 20 + if pe32_plus { 112 } else { 96 }
    }

    /// Builds a minimal PE image without a certificate table.
    pub fn unsigned_pe(pe32_plus: bool) -> Vec<u8> {
        let mut bin = vec![0u8; 0x200];
        bin[0..2].copy_from_slice(b"MZ");
        bin[0x3c..0x40].copy_from_slice(&0x40u32.to_le_bytes());
        bin[0x40..0x44].copy_from_slice(b"PE\0\0");

        let coff = 0x44;
        let machine: u16 = if pe32_plus { 0x8664 } else { 0x14c };
        bin[coff..coff + 2].copy_from_slice(&machine.to_le_bytes());
        let optional_len: u16 = if pe32_plus { 240 } else { 224 };
        bin[coff + 16..coff + 18].copy_from_slice(&optional_len.to_le_bytes());
        bin[coff + 18..coff + 20].copy_from_slice(&0x0102u16.to_le_bytes());

        let optional = coff + 20;
        let magic: u16 = if pe32_plus { 0x20b } else { 0x10b };
        bin[optional..optional + 2].copy_from_slice(&magic.to_le_bytes());
        let count_at = directories(pe32_plus) - 4;
        bin[count_at..count_at + 4].copy_from_slice(&16u32.to_le_bytes());

        for (i, byte) in bin[0x180..0x200].iter_mut().enumerate() {
            *byte = 0x90 ^ (i as u8);
        }
        bin
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{signed_pe, unsigned_pe};
    use super::*;

    #[test]
    fn test_sniff_formats() {
        assert_eq!(sniff_format(&signed_pe(true, 32)).unwrap(), BinaryFormat::Pe);
        let mut msi = MSI_MAGIC.to_vec();
        msi.resize(512, 0);
        assert_eq!(sniff_format(&msi).unwrap(), BinaryFormat::Msi);
        assert!(matches!(
            sniff_format(b"\x7fELF\x02\x01\x01\0\0\0\0\0\0\0\0\0"),
            Err(TagError::UnsupportedFormat { .. })
        ));
        assert!(sniff_format(b"MZ").is_err());
    }

    #[test]
    fn test_reserve_then_tag_keeps_length() {
        let tagger = BinaryTagger::new(256);
        let reserved = tagger.reserve(&signed_pe(true, 300)).unwrap();
        assert_eq!(tag_capacity(&reserved).unwrap(), Some(256));

        let tagged = tagger.tag(&reserved, b"appguid=x").unwrap();
        assert_eq!(tagged.placement, TagPlacement::CertificateTable);
        assert_eq!(tagged.bytes.len(), reserved.len());
        assert_eq!(extract_tag(&tagged.bytes).unwrap(), b"appguid=x");
    }

    #[test]
    fn test_reserve_is_idempotent() {
        let tagger = BinaryTagger::new(64);
        let once = tagger.reserve(&signed_pe(false, 90)).unwrap();
        assert_eq!(tagger.reserve(&once).unwrap(), once);
    }

    #[test]
    fn test_retag_replaces_previous_tag() {
        let tagger = BinaryTagger::new(64);
        let first = tagger.tag(&signed_pe(true, 40), b"a-much-longer-first-tag").unwrap();
        let second = tagger.tag(&first.bytes, b"short").unwrap();
        assert_eq!(extract_tag(&second.bytes).unwrap(), b"short");
        assert_eq!(first.bytes.len(), second.bytes.len());
    }

    #[test]
    fn test_tag_reserves_missing_region() {
        let tagged = BinaryTagger::new(128).tag(&signed_pe(true, 50), b"lang=fr").unwrap();
        assert_eq!(tag_capacity(&tagged.bytes).unwrap(), Some(128));
        assert_eq!(extract_tag(&tagged.bytes).unwrap(), b"lang=fr");
    }

    #[test]
    fn test_missing_region_without_reserve() {
        let err = BinaryTagger::new(128)
            .reserve_missing(false)
            .tag(&signed_pe(true, 50), b"x")
            .unwrap_err();
        assert!(matches!(err, TagError::NoTagRegion { .. }));
    }

    #[test]
    fn test_tag_too_large_for_budget() {
        let tagger = BinaryTagger::new(16);
        let err = tagger.tag(&signed_pe(true, 50), &[b'a'; 17]).unwrap_err();
        assert_eq!(err, TagError::TagTooLarge { len: 17, capacity: 16 });
        assert!(tagger.tag(&signed_pe(true, 50), &[b'a'; 16]).is_ok());
    }

    #[test]
    fn test_tag_too_large_for_wire() {
        let err = BinaryTagger::default()
            .tag(&signed_pe(true, 50), &vec![b'a'; MAX_TAG_LEN + 1])
            .unwrap_err();
        assert!(matches!(err, TagError::TagTooLarge { capacity: MAX_TAG_LEN, .. }));
    }

    #[test]
    fn test_unsigned_requires_explicit_policy() {
        let bin = unsigned_pe(true);
        assert!(matches!(
            BinaryTagger::default().tag(&bin, b"x"),
            Err(TagError::Unsigned { .. })
        ));

        let tagged = BinaryTagger::default()
            .with_policy(SignaturePolicy::AllowUnsigned)
            .tag(&bin, b"usagestats=1")
            .unwrap();
        assert_eq!(tagged.placement, TagPlacement::Appended);
        assert_eq!(extract_tag(&tagged.bytes).unwrap(), b"usagestats=1");
    }

    #[test]
    fn test_appended_tag_replaces_existing() {
        let bin = b"installer bytes".to_vec();
        let once = append_tag(&bin, b"first").unwrap();
        let twice = append_tag(&once, b"second").unwrap();
        assert_eq!(strip_appended_tag(&twice), bin.as_slice());
        assert_eq!(extract_tag(&twice).unwrap(), b"second");
    }

    #[test]
    fn test_appended_payload_containing_magic() {
        let mut payload = b"x=".to_vec();
        payload.extend_from_slice(TAG_MAGIC);
        let tagged = append_tag(b"body", &payload).unwrap();
        assert_eq!(extract_tag(&tagged).unwrap(), payload);
    }

    #[test]
    fn test_msi_uses_appended_tag() {
        let mut msi = MSI_MAGIC.to_vec();
        msi.resize(512, 0);
        let tagged = BinaryTagger::default().tag(&msi, b"appguid=y").unwrap();
        assert_eq!(tagged.placement, TagPlacement::Appended);
        assert!(BinaryTagger::default().reserve(&msi).is_err());
    }

    #[test]
    fn test_extract_absent() {
        assert!(extract_tag(&signed_pe(true, 32)).is_none());
        assert!(extract_tag(b"plain").is_none());
    }
}
