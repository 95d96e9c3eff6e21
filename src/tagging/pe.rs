//! PE certificate table access.
//!
//! Authenticode hashes exclude the certificate table and its data
//! directory entry, so bytes padded after the PKCS#7 blob inside the table
//! can change without invalidating the signature. This module finds the
//! table, validates the single `WIN_CERTIFICATE` it must hold, and rewrites
//! the padding.

use crate::error::TagError;

const PE_POINTER_OFFSET: usize = 0x3c;
const COFF_HEADER_LEN: usize = 20;
const PE32_MAGIC: u16 = 0x10b;
const PE32_PLUS_MAGIC: u16 = 0x20b;
const CERTIFICATE_TABLE_INDEX: usize = 4;
const WIN_CERT_HEADER_LEN: usize = 8;
const WIN_CERT_REVISION_2_0: u16 = 0x200;
const WIN_CERT_TYPE_PKCS_SIGNED_DATA: u16 = 2;

fn malformed(reason: impl Into<String>) -> TagError {
    TagError::MalformedCertificateTable {
        reason: reason.into(),
    }
}

fn u16_at(bin: &[u8], at: usize) -> Result<u16, TagError> {
    bin.get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| malformed(format!("binary truncated at offset {at:#x}")))
}

fn u32_at(bin: &[u8], at: usize) -> Result<usize, TagError> {
    bin.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
        .ok_or_else(|| malformed(format!("binary truncated at offset {at:#x}")))
}

/// Location of a PE image's certificate table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertificateTable {
    /// File offset of the `WIN_CERTIFICATE` structure
    pub offset: usize,
    /// Size recorded in the data directory
    pub size: usize,
    /// File offset of the data directory's size field
    pub size_field: usize,
    /// Length of the DER-encoded PKCS#7 blob
    pub der_len: usize,
}

impl CertificateTable {
    /// Offset just past the PKCS#7 blob, where padding starts.
    pub fn padding_start(&self) -> usize {
        self.offset + WIN_CERT_HEADER_LEN + self.der_len
    }

    /// Offset of the end of the table.
    pub fn end(&self) -> usize {
        self.offset + self.size
    }
}

/// Signature state of a PE image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeSignature {
    /// No certificate table
    Unsigned,
    /// A certificate table at the end of the file
    Signed(CertificateTable),
}

/// Length of a DER object, header included.
fn der_length(der: &[u8]) -> Result<usize, TagError> {
    if der.len() < 2 || der[0] != 0x30 {
        return Err(malformed("certificate is not a DER SEQUENCE"));
    }
    let first = der[1];
    if first & 0x80 == 0 {
        return Ok(usize::from(first) + 2);
    }
    let count = usize::from(first & 0x7f);
    if count == 0 || count > 2 {
        return Err(malformed(format!("bad number of bytes in DER length: {count}")));
    }
    let bytes = der
        .get(2..2 + count)
        .ok_or_else(|| malformed("DER length truncated"))?;
    let len = bytes.iter().fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
    Ok(len + 2 + count)
}

/// Finds the certificate table of a PE image.
pub fn inspect(bin: &[u8]) -> Result<PeSignature, TagError> {
    let pe = u32_at(bin, PE_POINTER_OFFSET)?;
    if bin.get(pe..pe + 4) != Some(b"PE\0\0".as_slice()) {
        return Err(malformed("PE signature not found at expected offset"));
    }

    let coff = pe + 4;
    let optional_len = usize::from(u16_at(bin, coff + 16)?);
    let optional = coff + COFF_HEADER_LEN;
    let directories = match u16_at(bin, optional)? {
        PE32_MAGIC => optional + 96,
        PE32_PLUS_MAGIC => optional + 112,
        other => return Err(malformed(format!("unknown optional header magic {other:#x}"))),
    };

    let directory_count = u32_at(bin, directories - 4)?;
    if directory_count <= CERTIFICATE_TABLE_INDEX {
        return Ok(PeSignature::Unsigned);
    }
    if directories + directory_count * 8 > optional + optional_len {
        return Err(malformed("data directories overrun the optional header"));
    }

    let entry = directories + CERTIFICATE_TABLE_INDEX * 8;
    let (offset, size) = (u32_at(bin, entry)?, u32_at(bin, entry + 4)?);
    if offset == 0 && size == 0 {
        return Ok(PeSignature::Unsigned);
    }
    if offset.checked_add(size) != Some(bin.len()) {
        return Err(malformed(format!(
            "certificate table ends at {}, file is {} bytes",
            offset.saturating_add(size),
            bin.len()
        )));
    }

    let cert_len = u32_at(bin, offset)?;
    if cert_len != size {
        return Err(malformed("multiple attribute certificates found"));
    }
    let revision = u16_at(bin, offset + 4)?;
    if revision != WIN_CERT_REVISION_2_0 {
        return Err(malformed(format!("unknown certificate revision {revision:#x}")));
    }
    let cert_type = u16_at(bin, offset + 6)?;
    if cert_type != WIN_CERT_TYPE_PKCS_SIGNED_DATA {
        return Err(malformed(format!("unknown certificate type {cert_type}")));
    }

    let der_len = der_length(&bin[offset + WIN_CERT_HEADER_LEN..])?;
    if WIN_CERT_HEADER_LEN + der_len > size {
        return Err(malformed("PKCS#7 blob overruns the certificate table"));
    }

    Ok(PeSignature::Signed(CertificateTable {
        offset,
        size,
        size_field: entry + 4,
        der_len,
    }))
}

/// Rebuilds the image with `padding` after the PKCS#7 blob.
///
/// Padding is zero-extended so the table stays 8-byte aligned; both the
/// data directory size and `dwLength` are updated.
pub fn with_padding(bin: &[u8], table: &CertificateTable, padding: &[u8]) -> Result<Vec<u8>, TagError> {
    let mut padded_len = padding.len();
    while (table.der_len + padded_len) % 8 != 0 {
        padded_len += 1;
    }
    let new_size = WIN_CERT_HEADER_LEN + table.der_len + padded_len;
    let size_bytes = u32::try_from(new_size)
        .map_err(|_| malformed("certificate table would exceed 4 GiB"))?
        .to_le_bytes();

    let mut out = Vec::with_capacity(table.offset + new_size);
    out.extend_from_slice(&bin[..table.padding_start()]);
    out.extend_from_slice(padding);
    out.resize(table.offset + new_size, 0);
    out[table.size_field..table.size_field + 4].copy_from_slice(&size_bytes);
    out[table.offset..table.offset + 4].copy_from_slice(&size_bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tagging::testing::{signed_pe, unsigned_pe};

    #[test]
    fn test_inspect_signed_image() {
        let bin = signed_pe(true, 300);
        let PeSignature::Signed(table) = inspect(&bin).unwrap() else {
            panic!("expected a certificate table");
        };
        assert_eq!(table.end(), bin.len());
        assert_eq!(table.der_len, 304);
        assert_eq!(table.padding_start(), table.offset + 8 + 304);
    }

    #[test]
    fn test_inspect_pe32() {
        let bin = signed_pe(false, 40);
        assert!(matches!(inspect(&bin).unwrap(), PeSignature::Signed(_)));
    }

    #[test]
    fn test_inspect_unsigned_image() {
        assert_eq!(inspect(&unsigned_pe(true)).unwrap(), PeSignature::Unsigned);
    }

    #[test]
    fn test_table_must_end_file() {
        let mut bin = signed_pe(true, 64);
        bin.extend_from_slice(b"trailing");
        assert!(matches!(inspect(&bin), Err(TagError::MalformedCertificateTable { .. })));
    }

    #[test]
    fn test_with_padding_updates_both_lengths() {
        let bin = signed_pe(true, 100);
        let PeSignature::Signed(table) = inspect(&bin).unwrap() else {
            panic!("expected a certificate table");
        };
        let padded = with_padding(&bin, &table, &[1, 2, 3]).unwrap();
        let PeSignature::Signed(after) = inspect(&padded).unwrap() else {
            panic!("expected a certificate table");
        };
        assert_eq!(after.size % 8, 0);
        assert_eq!(after.end(), padded.len());
        assert_eq!(after.der_len, table.der_len);
        assert_eq!(&padded[after.padding_start()..after.padding_start() + 3], &[1, 2, 3]);
        assert_eq!(&padded[..table.size_field], &bin[..table.size_field]);
        assert_eq!(&padded[table.size_field + 4..table.offset], &bin[table.size_field + 4..table.offset]);
    }

    #[test]
    fn test_der_length_forms() {
        assert_eq!(der_length(&[0x30, 0x05]).unwrap(), 7);
        assert_eq!(der_length(&[0x30, 0x81, 0x90]).unwrap(), 0x93);
        assert_eq!(der_length(&[0x30, 0x82, 0x01, 0x00]).unwrap(), 0x104);
        assert!(der_length(&[0x30, 0x83, 0, 0, 0]).is_err());
        assert!(der_length(&[0x31, 0x01]).is_err());
    }
}
