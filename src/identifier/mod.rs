//! Deterministic identifiers for installer packages.
//!
//! Name-based GUIDs follow RFC 4122 section 4.3 in spirit but use their own
//! bit substitution: the high nibble of byte 6 becomes `3` and the two high
//! bits of byte 8 become `10`. The digest is MD5 of `namespace || name`.
//! GUIDs render as lowercase `8-4-4-4-12` hex.

mod msi;

pub use msi::{MsiVersion, convert_to_installer_version};

use uuid::Uuid;

/// Namespace used for enterprise installer product and upgrade codes.
pub const INSTALLER_NAMESPACE_HEX: &str = "BE19B3E4502845af8B3E67A99FCDCFB1";

/// Derives a GUID from `namespace || name`.
///
/// Identical inputs always produce identical output.
pub fn derive_guid(namespace: &[u8], name: &[u8]) -> String {
    let mut input = Vec::with_capacity(namespace.len() + name.len());
    input.extend_from_slice(namespace);
    input.extend_from_slice(name);

    let mut bytes: [u8; 16] = md5::compute(&input).0;
    bytes[6] = 0x30 | (bytes[6] & 0x0f);
    bytes[8] = 0x80 | (bytes[8] & 0x3f);

    Uuid::from_bytes(bytes).hyphenated().to_string()
}

/// Decodes [`INSTALLER_NAMESPACE_HEX`] into its raw bytes.
pub fn installer_namespace() -> Vec<u8> {
    // The constant is 32 hex digits, so decoding cannot fail.
    hex::decode(INSTALLER_NAMESPACE_HEX).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nibble(guid: &str, index: usize) -> u8 {
        let digits: Vec<char> = guid.chars().filter(|c| *c != '-').collect();
        digits[index].to_digit(16).unwrap() as u8
    }

    #[test]
    fn test_guid_is_deterministic() {
        let ns = installer_namespace();
        let a = derive_guid(&ns, b"Product Foo 1.0");
        let b = derive_guid(&ns, b"Product Foo 1.0");
        assert_eq!(a, b);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn test_guid_changes_with_either_input() {
        let ns = installer_namespace();
        let base = derive_guid(&ns, b"Product Foo 1.0");
        assert_ne!(base, derive_guid(&ns, b"Product Foo 1.1"));
        assert_ne!(base, derive_guid(b"other", b"Product Foo 1.0"));
    }

    #[test]
    fn test_guid_layout_and_reserved_bits() {
        let guid = derive_guid(b"ns", b"name");
        let groups: Vec<usize> = guid.split('-').map(str::len).collect();
        assert_eq!(groups, vec![8, 4, 4, 4, 12]);
        assert!(guid.chars().all(|c| c == '-' || c.is_ascii_digit() || c.is_ascii_lowercase()));

        // Byte 6 high nibble is hex digit 12, byte 8 high nibble is digit 16.
        assert_eq!(nibble(&guid, 12), 0x3);
        assert_eq!(nibble(&guid, 16) & 0xc, 0x8);
    }

    #[test]
    fn test_guid_matches_manual_substitution() {
        let mut digest = md5::compute(b"nsname").0;
        digest[6] = 0x30 | (digest[6] & 0x0f);
        digest[8] = 0x80 | (digest[8] & 0x3f);
        let expected = format!(
            "{}-{}-{}-{}-{}",
            hex::encode(&digest[0..4]),
            hex::encode(&digest[4..6]),
            hex::encode(&digest[6..8]),
            hex::encode(&digest[8..10]),
            hex::encode(&digest[10..16])
        );
        assert_eq!(derive_guid(b"ns", b"name"), expected);
    }

    #[test]
    fn test_installer_namespace_decodes() {
        let ns = installer_namespace();
        assert_eq!(ns.len(), 16);
        assert_eq!(ns[0], 0xbe);
        assert_eq!(ns[15], 0xb1);
    }
}
