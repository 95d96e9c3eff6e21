//! Product version handling.
//!
//! A [`VersionDescriptor`] is read once from a version-description file at
//! pipeline start and never mutated afterwards. Test builds derive a new
//! descriptor through [`VersionDescriptor::as_test_version`].

mod signed_file;
mod source;

pub use signed_file::SignedFileInfo;
pub use source::{load_version_file, parse_version_text};

use crate::error::VersionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prefixes accepted by [`VersionDescriptor::as_test_version`].
pub const RECOGNIZED_TEST_PREFIXES: &[&str] = &["TEST_"];

/// A four-component product version, ordered component-wise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProductVersion {
    /// Major component
    pub major: u32,
    /// Minor component
    pub minor: u32,
    /// Build component
    pub build: u32,
    /// Patch component
    pub patch: u32,
}

impl ProductVersion {
    /// Creates a version from its four components.
    pub const fn new(major: u32, minor: u32, build: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            build,
            patch,
        }
    }
}

impl fmt::Display for ProductVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.build, self.patch)
    }
}

impl FromStr for ProductVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| VersionError::InvalidVersionFormat {
            source_name: format!("'{s}'"),
            reason,
        };

        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 4 {
            return Err(invalid(format!("expected 4 components, found {}", parts.len())));
        }

        let mut fields = [0u32; 4];
        for (slot, part) in fields.iter_mut().zip(&parts) {
            *slot = part
                .parse::<u32>()
                .map_err(|e| invalid(format!("component '{part}': {e}")))?;
        }

        Ok(Self::new(fields[0], fields[1], fields[2], fields[3]))
    }
}

/// A product version together with the metadata the payload pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDescriptor {
    version: ProductVersion,
    update_plugin_version: Option<u32>,
    file_prefix: String,
}

impl VersionDescriptor {
    /// Creates a production descriptor with no plugin version.
    pub fn new(major: u32, minor: u32, build: u32, patch: u32) -> Self {
        Self {
            version: ProductVersion::new(major, minor, build, patch),
            update_plugin_version: None,
            file_prefix: String::new(),
        }
    }

    /// Sets the update plugin version used to name the plugin library.
    pub fn with_update_plugin_version(mut self, plugin_version: u32) -> Self {
        self.update_plugin_version = Some(plugin_version);
        self
    }

    /// Parses a descriptor from version-description text.
    ///
    /// See [`parse_version_text`] for the accepted formats.
    pub fn parse(text: &str, source_name: &str) -> Result<Self, VersionError> {
        parse_version_text(text, source_name)
    }

    /// The four version components.
    pub fn version(&self) -> ProductVersion {
        self.version
    }

    /// Major component.
    pub fn major(&self) -> u32 {
        self.version.major
    }

    /// Minor component.
    pub fn minor(&self) -> u32 {
        self.version.minor
    }

    /// Build component.
    pub fn build(&self) -> u32 {
        self.version.build
    }

    /// Patch component.
    pub fn patch(&self) -> u32 {
        self.version.patch
    }

    /// Update plugin version, if the version file declared one.
    pub fn update_plugin_version(&self) -> Option<u32> {
        self.update_plugin_version
    }

    /// Filename prefix attached by [`as_test_version`](Self::as_test_version).
    ///
    /// Empty for production descriptors.
    pub fn file_prefix(&self) -> &str {
        &self.file_prefix
    }

    /// Whether this descriptor was derived as a test version.
    pub fn is_test(&self) -> bool {
        !self.file_prefix.is_empty()
    }

    /// The field that moves between releases: `patch` when non-zero, else `build`.
    pub fn incrementing_field(&self) -> (&'static str, u32) {
        if self.version.patch > 0 {
            ("patch", self.version.patch)
        } else {
            ("build", self.version.build)
        }
    }

    /// Checks that the incrementing field is odd.
    pub fn validate(&self) -> Result<(), VersionError> {
        let (field, value) = self.incrementing_field();
        if value % 2 == 0 {
            return Err(VersionError::OddnessInvariantViolated {
                version: self.to_string(),
                field,
                value,
            });
        }
        Ok(())
    }

    /// Derives a test descriptor by adding `delta` to the incrementing field.
    ///
    /// The returned descriptor carries `prefix`, which must be one of
    /// [`RECOGNIZED_TEST_PREFIXES`].
    pub fn as_test_version(&self, delta: u32, prefix: &str) -> Result<Self, VersionError> {
        if delta == 0 {
            return Err(VersionError::InvalidDelta { delta });
        }
        if !RECOGNIZED_TEST_PREFIXES.contains(&prefix) {
            return Err(VersionError::UnrecognizedPrefix {
                prefix: prefix.to_string(),
            });
        }

        let mut version = self.version;
        let (field, value) = self.incrementing_field();
        let bumped = value.checked_add(delta).ok_or_else(|| VersionError::InvalidVersionFormat {
            source_name: self.to_string(),
            reason: format!("{field} overflows when adding {delta}"),
        })?;
        if field == "patch" {
            version.patch = bumped;
        } else {
            version.build = bumped;
        }

        Ok(Self {
            version,
            update_plugin_version: self.update_plugin_version,
            file_prefix: prefix.to_string(),
        })
    }
}

impl fmt::Display for VersionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.version.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_dotted_quad() {
        assert_eq!(VersionDescriptor::new(1, 3, 99, 5).to_string(), "1.3.99.5");
    }

    #[test]
    fn test_even_build_fails_validation() {
        let err = VersionDescriptor::new(1, 3, 100, 0).validate().unwrap_err();
        assert_eq!(
            err,
            VersionError::OddnessInvariantViolated {
                version: "1.3.100.0".to_string(),
                field: "build",
                value: 100,
            }
        );
        assert!(VersionDescriptor::new(1, 3, 101, 0).validate().is_ok());
    }

    #[test]
    fn test_patch_is_incrementing_when_nonzero() {
        let v = VersionDescriptor::new(1, 3, 100, 7);
        assert_eq!(v.incrementing_field(), ("patch", 7));
        assert!(v.validate().is_ok());
        assert!(VersionDescriptor::new(1, 3, 101, 8).validate().is_err());
    }

    #[test]
    fn test_as_test_version_bumps_active_field() {
        let official = VersionDescriptor::new(1, 3, 99, 5).with_update_plugin_version(3);
        let test = official.as_test_version(1, "TEST_").unwrap();
        assert_eq!(test.to_string(), "1.3.99.6");
        assert_eq!(test.file_prefix(), "TEST_");
        assert_eq!(test.update_plugin_version(), Some(3));
        assert!(test.is_test());
        // The original stays untouched.
        assert_eq!(official.to_string(), "1.3.99.5");
        assert!(!official.is_test());

        let build_based = VersionDescriptor::new(1, 2, 183, 0).as_test_version(2, "TEST_").unwrap();
        assert_eq!(build_based.to_string(), "1.2.185.0");
    }

    #[test]
    fn test_as_test_version_rejects_bad_input() {
        let v = VersionDescriptor::new(1, 3, 99, 5);
        assert_eq!(
            v.as_test_version(0, "TEST_").unwrap_err(),
            VersionError::InvalidDelta { delta: 0 }
        );
        assert!(matches!(
            v.as_test_version(1, "BETA_").unwrap_err(),
            VersionError::UnrecognizedPrefix { .. }
        ));
    }

    #[test]
    fn test_product_version_ordering_and_parsing() {
        let a: ProductVersion = "1.3.21.85".parse().unwrap();
        let b = ProductVersion::new(1, 3, 22, 0);
        assert!(a < b);
        assert!(ProductVersion::new(1, 2, 999, 0) < ProductVersion::new(1, 3, 0, 0));
        assert!("1.3.21".parse::<ProductVersion>().is_err());
        assert!("1.3.x.4".parse::<ProductVersion>().is_err());
    }
}
