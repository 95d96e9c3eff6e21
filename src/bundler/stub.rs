//! Stub merge and payload location.
//!
//! The bootstrap stub finds its payload through a fixed footer at the end
//! of the merged file:
//!
//! ```text
//! stub | resource container | u64 LE offset | u64 LE length | "MIPAYLD\0"
//! ```
//!
//! A stub that already carries a payload is stripped back to the bare stub
//! before merging, so merging the same container twice yields the same
//! bytes.

use crate::bail;
use crate::bundler::archive::read_archive;
use crate::bundler::branch_filter;
use crate::bundler::compress::decompress_payload;
use crate::bundler::error::{Context, ErrorExt};
use crate::bundler::resource::{PAYLOAD_RESOURCE, PAYLOAD_RESOURCE_TYPE, Resource, find_resource, parse_container};
use crate::bundler::Result;
use std::path::{Path, PathBuf};

/// Footer marker.
pub const FOOTER_MAGIC: &[u8; 8] = b"MIPAYLD\0";

/// Footer size in bytes.
pub const FOOTER_LEN: usize = 8 + 8 + FOOTER_MAGIC.len();

/// Position of an embedded container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadLocation {
    /// Offset of the container
    pub offset: usize,
    /// Container length
    pub len: usize,
}

/// Locates the container of a merged binary, if any.
///
/// Signing and tagging append data after the footer, so the last footer
/// whose offset and length reach exactly up to it wins.
pub fn locate_payload(binary: &[u8]) -> Option<PayloadLocation> {
    let magic_at = binary
        .windows(FOOTER_MAGIC.len())
        .rposition(|window| window == FOOTER_MAGIC)?;
    let footer_start = magic_at.checked_sub(16)?;
    let read = |at: usize| {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&binary[at..at + 8]);
        usize::try_from(u64::from_le_bytes(raw)).ok()
    };
    let (offset, len) = (read(footer_start)?, read(footer_start + 8)?);
    let end = offset.checked_add(len)?;
    (end == footer_start).then_some(PayloadLocation { offset, len })
}

/// Strips an embedded container and anything after it, returning the
/// bare stub.
pub fn bare_stub(binary: &[u8]) -> &[u8] {
    match locate_payload(binary) {
        Some(location) => &binary[..location.offset],
        None => binary,
    }
}

/// Appends `container` to `stub`.
pub fn merge(stub: &[u8], container: &[u8]) -> Vec<u8> {
    let stub = bare_stub(stub);
    let mut out = Vec::with_capacity(stub.len() + container.len() + FOOTER_LEN);
    out.extend_from_slice(stub);
    out.extend_from_slice(container);
    out.extend_from_slice(&(stub.len() as u64).to_le_bytes());
    out.extend_from_slice(&(container.len() as u64).to_le_bytes());
    out.extend_from_slice(FOOTER_MAGIC);
    out
}

/// Merges the container file into the stub file, writing `output`.
pub fn merge_files(stub: &Path, container: &Path, output: &Path) -> Result<PathBuf> {
    let stub_bytes = std::fs::read(stub).fs_context("reading stub", stub)?;
    if stub_bytes.is_empty() {
        bail!("stub {} is empty", stub.display());
    }
    let container_bytes = std::fs::read(container).fs_context("reading resource container", container)?;
    let merged = merge(&stub_bytes, &container_bytes);
    std::fs::write(output, &merged).fs_context("writing merged installer", output)?;
    log::debug!(
        "merged {} byte container into {} byte stub",
        container_bytes.len(),
        bare_stub(&stub_bytes).len()
    );
    Ok(output.to_path_buf())
}

/// Resources of a merged binary.
pub fn embedded_resources(binary: &[u8]) -> Result<Vec<Resource>> {
    let location = locate_payload(binary).context("binary carries no merged payload")?;
    parse_container(&binary[location.offset..location.offset + location.len])
}

/// Contents of a merged installer's payload.
#[derive(Debug, Clone)]
pub struct UnpackedPayload {
    /// Whether the branch filter was applied
    pub branch_filtered: bool,
    /// Size of the stored (compressed) payload
    pub compressed_len: usize,
    /// Archive entries, in order
    pub files: Vec<(String, Vec<u8>)>,
}

/// Inverts the assembly: locate, decompress, unfilter and untar.
pub fn unpack(binary: &[u8]) -> Result<UnpackedPayload> {
    let resources = embedded_resources(binary)?;
    let payload = find_resource(&resources, PAYLOAD_RESOURCE, PAYLOAD_RESOURCE_TYPE)
        .context("merged payload has no IDR_PAYLOAD resource")?;

    let decompressed = decompress_payload(&payload.data)?;
    let branch_filtered = branch_filter::is_filtered(&decompressed);
    let archive = if branch_filtered {
        branch_filter::decode(&decompressed)?
    } else {
        decompressed
    };

    Ok(UnpackedPayload {
        branch_filtered,
        compressed_len: payload.data.len(),
        files: read_archive(&archive)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_round_trip_location() {
        let merged = merge(b"MZ-stub", b"MIRC-container");
        let location = locate_payload(&merged).unwrap();
        assert_eq!(location, PayloadLocation { offset: 7, len: 14 });
        assert_eq!(bare_stub(&merged), b"MZ-stub");
    }

    #[test]
    fn test_merge_is_idempotent() {
        let once = merge(b"MZ-stub", b"container");
        let twice = merge(&once, b"container");
        assert_eq!(once, twice);

        let replaced = merge(&once, b"other");
        assert_eq!(replaced, merge(b"MZ-stub", b"other"));
    }

    #[test]
    fn test_payload_found_behind_trailing_data() {
        let mut merged = merge(b"MZ-stub", b"container");
        merged.extend_from_slice(b"certificate table and tag");
        assert_eq!(
            locate_payload(&merged),
            Some(PayloadLocation { offset: 7, len: 9 })
        );
        assert_eq!(merge(&merged, b"container"), merge(b"MZ-stub", b"container"));
    }

    #[test]
    fn test_plain_binary_has_no_payload() {
        assert!(locate_payload(b"MZ plain binary without footer").is_none());
        assert!(embedded_resources(b"MZ").is_err());
    }

    #[test]
    fn test_inconsistent_footer_is_ignored() {
        let mut merged = merge(b"MZ-stub", b"container");
        let at = merged.len() - FOOTER_LEN;
        merged[at] = 0xff;
        assert!(locate_payload(&merged).is_none());
    }
}
