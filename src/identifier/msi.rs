//! Installer (MSI) version compression.
//!
//! Windows Installer only honours the first three version fields, and the
//! first two must stay below 256. Product versions therefore drop major and
//! minor and repack build and patch:
//!
//! ```text
//! X = 0x40 | ((build & 0xffff) >> 10)
//! Y = (build >> 2) & 0xff
//! Z = ((build & 0x3) << 14) | (patch & 0x3fff)
//! ```

use crate::error::VersionError;
use crate::version::{ProductVersion, VersionDescriptor};
use std::fmt;

const MAX_PATCH: u32 = 0x3fff;
const MAX_BUILD: u32 = 0xffff;

/// A three-component installer version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsiVersion {
    /// First field, always `>= 0x40`
    pub x: u8,
    /// Second field
    pub y: u8,
    /// Third field
    pub z: u16,
}

impl MsiVersion {
    /// Compresses a product version.
    pub fn from_product_version(version: ProductVersion) -> Result<Self, VersionError> {
        let (build, patch) = (version.build, version.patch);
        if patch > MAX_PATCH {
            return Err(VersionError::PatchOutOfRange {
                version: version.to_string(),
                patch,
            });
        }
        if build > MAX_BUILD {
            return Err(VersionError::BuildOutOfRange {
                version: version.to_string(),
                build,
            });
        }

        // Range checks above keep every field within its target width.
        Ok(Self {
            x: (0x40 | ((build & 0xffff) >> 10)) as u8,
            y: ((build >> 2) & 0xff) as u8,
            z: (((build & 0x3) << 14) | (patch & 0x3fff)) as u16,
        })
    }

    /// Compresses the version of a descriptor.
    pub fn from_descriptor(descriptor: &VersionDescriptor) -> Result<Self, VersionError> {
        Self::from_product_version(descriptor.version())
    }
}

impl fmt::Display for MsiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.x, self.y, self.z)
    }
}

/// Converts a dotted version string to its installer form.
///
/// Strings that are not four numeric fields are returned unchanged, so
/// callers may pass versions that are already in installer form.
pub fn convert_to_installer_version(version: &str) -> Result<String, VersionError> {
    match version.parse::<ProductVersion>() {
        Ok(parsed) => Ok(MsiVersion::from_product_version(parsed)?.to_string()),
        Err(_) => {
            log::debug!("'{}' is not a four-field version, passing through", version);
            Ok(version.to_string())
        }
    }
}
