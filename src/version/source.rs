//! Version-description sources.
//!
//! A version file is treated as a static key/value source and is never
//! evaluated. Two encodings are accepted:
//!
//! ```text
//! # key = value lines
//! version_major = 1
//! version_minor = 3
//! version_build = 99
//! version_patch = 5
//! update_plugin_version = 3
//! ```
//!
//! or a JSON object with the same keys. Unknown keys are ignored.

use super::{ProductVersion, VersionDescriptor};
use crate::error::VersionError;
use std::collections::BTreeMap;
use std::path::Path;

const REQUIRED_KEYS: [&str; 4] = [
    "version_major",
    "version_minor",
    "version_build",
    "version_patch",
];
const PLUGIN_KEY: &str = "update_plugin_version";

/// First version whose payload names the update plugin library.
const PLUGIN_REQUIRED_FROM: ProductVersion = ProductVersion::new(1, 3, 0, 0);

#[derive(Debug)]
enum RawField {
    Integer(i64),
    Other(String),
}

/// Reads and parses a version-description file.
pub fn load_version_file(path: &Path) -> Result<VersionDescriptor, VersionError> {
    let source_name = path.display().to_string();
    let text = std::fs::read_to_string(path).map_err(|e| VersionError::InvalidVersionFormat {
        source_name: source_name.clone(),
        reason: format!("cannot read file: {e}"),
    })?;
    parse_version_text(&text, &source_name)
}

/// Parses version-description text, detecting JSON by a leading `{`.
pub fn parse_version_text(text: &str, source_name: &str) -> Result<VersionDescriptor, VersionError> {
    let invalid = |reason: String| VersionError::InvalidVersionFormat {
        source_name: source_name.to_string(),
        reason,
    };

    let fields = if text.trim_start().starts_with('{') {
        json_fields(text).map_err(invalid)?
    } else {
        key_value_fields(text).map_err(invalid)?
    };

    let mut components = [0u32; 4];
    for (slot, key) in components.iter_mut().zip(REQUIRED_KEYS) {
        *slot = integer_field(&fields, key)
            .and_then(|v| v.ok_or_else(|| format!("missing {key}")))
            .map_err(invalid)?;
    }

    let mut descriptor =
        VersionDescriptor::new(components[0], components[1], components[2], components[3]);

    match integer_field(&fields, PLUGIN_KEY).map_err(invalid)? {
        Some(plugin) => descriptor = descriptor.with_update_plugin_version(plugin),
        None if descriptor.version() >= PLUGIN_REQUIRED_FROM => {
            return Err(invalid(format!(
                "missing {PLUGIN_KEY}, required for version {descriptor}"
            )));
        }
        None => {}
    }

    log::debug!("Parsed version {} from {}", descriptor, source_name);
    Ok(descriptor)
}

fn integer_field(fields: &BTreeMap<String, RawField>, key: &str) -> Result<Option<u32>, String> {
    match fields.get(key) {
        None => Ok(None),
        Some(RawField::Other(raw)) => Err(format!("{key} is not an integer: {raw}")),
        Some(RawField::Integer(value)) if *value < 0 => {
            Err(format!("{key} must not be negative, found {value}"))
        }
        Some(RawField::Integer(value)) => u32::try_from(*value)
            .map(Some)
            .map_err(|_| format!("{key} is out of range: {value}")),
    }
}

fn json_fields(text: &str) -> Result<BTreeMap<String, RawField>, String> {
    let object: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(text).map_err(|e| format!("invalid JSON: {e}"))?;

    Ok(object
        .into_iter()
        .map(|(key, value)| {
            let field = match value.as_i64() {
                Some(i) => RawField::Integer(i),
                None => RawField::Other(value.to_string()),
            };
            (key, field)
        })
        .collect())
}

fn key_value_fields(text: &str) -> Result<BTreeMap<String, RawField>, String> {
    let table: toml::Table = toml::from_str(text).map_err(|e| format!("invalid key = value data: {e}"))?;

    Ok(table
        .into_iter()
        .map(|(key, value)| {
            let field = match value {
                toml::Value::Integer(i) => RawField::Integer(i),
                other => RawField::Other(other.to_string()),
            };
            (key, field)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_VALUE: &str = "\
# Product version
version_major = 1
version_minor = 3
version_build = 99
version_patch = 5
update_plugin_version = 3
oneclick_plugin_version = 1
";

    #[test]
    fn test_parse_key_value() {
        let v = parse_version_text(KEY_VALUE, "VERSION").unwrap();
        assert_eq!(v.to_string(), "1.3.99.5");
        assert_eq!(v.update_plugin_version(), Some(3));
        assert_eq!(v.file_prefix(), "");
    }

    #[test]
    fn test_parse_json() {
        let text = r#"{"version_major": 1, "version_minor": 2, "version_build": 183,
                       "version_patch": 7, "channel": "stable"}"#;
        let v = parse_version_text(text, "version.json").unwrap();
        assert_eq!(v.to_string(), "1.2.183.7");
        assert_eq!(v.update_plugin_version(), None);
    }

    #[test]
    fn test_missing_field_is_rejected() {
        let err = parse_version_text("version_major = 1\nversion_minor = 3\n", "VERSION").unwrap_err();
        match err {
            VersionError::InvalidVersionFormat { source_name, reason } => {
                assert_eq!(source_name, "VERSION");
                assert!(reason.contains("version_build"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_negative_and_non_integer_are_rejected() {
        let negative = KEY_VALUE.replace("version_patch = 5", "version_patch = -5");
        assert!(parse_version_text(&negative, "VERSION").is_err());

        let text = KEY_VALUE.replace("version_build = 99", "version_build = \"99\"");
        let err = parse_version_text(&text, "VERSION").unwrap_err();
        assert!(err.to_string().contains("not an integer"));
    }

    #[test]
    fn test_plugin_version_required_for_newer_versions() {
        let text = KEY_VALUE.replace("update_plugin_version = 3\n", "");
        let err = parse_version_text(&text, "VERSION").unwrap_err();
        assert!(err.to_string().contains("update_plugin_version"));
    }

    #[test]
    fn test_load_version_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("VERSION");
        std::fs::write(&path, KEY_VALUE).unwrap();
        assert_eq!(load_version_file(&path).unwrap().build(), 99);

        let missing = dir.path().join("absent");
        let err = load_version_file(&missing).unwrap_err();
        assert!(err.to_string().contains("absent"));
    }
}
