//! Payload compatibility resolution.
//!
//! Maps a [`VersionDescriptor`] to the ordered list of files the
//! metainstaller carries and the resource languages it ships. The lists are
//! recomputed for every descriptor and never cached across versions.

mod rules;

pub use rules::{
    CompatibilityRule, FILE_RULES, LANGUAGE_CATALOG, LANGUAGE_RULES, PayloadFile,
    RESOURCE_DLL_PREFIX, SHELL_ONLY_LANGUAGES, UnsupportedRange,
};

use crate::error::PayloadError;
use crate::version::{ProductVersion, SignedFileInfo, VersionDescriptor};
use rules::{UNSUPPORTED_FILE_RANGES, UNSUPPORTED_LANGUAGE_RANGES};

/// Ordered payload filenames; order determines archive layout.
pub type PayloadFileList = Vec<String>;

/// Resolves the payload for `version` using every language it supports.
pub fn resolve_files(prefix: &str, version: &VersionDescriptor) -> Result<PayloadFileList, PayloadError> {
    let languages = resolve_languages(version)?;
    resolve_files_for_languages(prefix, version, &languages)
}

/// Resolves the payload for `version` restricted to `languages`.
///
/// Every requested language must be supported by the version.
pub fn resolve_files_for_languages<S: AsRef<str>>(
    prefix: &str,
    version: &VersionDescriptor,
    languages: &[S],
) -> Result<PayloadFileList, PayloadError> {
    let product_version = version.version();
    let files = apply_rules(FILE_RULES, UNSUPPORTED_FILE_RANGES, product_version)?;

    let supported = resolve_languages(version)?;
    for language in languages {
        let language = language.as_ref();
        if !supported.iter().any(|l| l == language) {
            return Err(PayloadError::UnsupportedLanguage {
                language: language.to_string(),
                version: version.to_string(),
            });
        }
    }

    let mut names: PayloadFileList = files
        .iter()
        .map(|file| file_name(file, version).map(|name| format!("{prefix}{name}")))
        .collect::<Result<_, _>>()?;
    names.extend(
        languages
            .iter()
            .map(|lang| format!("{prefix}{RESOURCE_DLL_PREFIX}{}.dll", lang.as_ref())),
    );

    log::debug!("Resolved {} payload files for {}", names.len(), version);
    Ok(names)
}

/// Resolves the resource languages shipped with `version`, in insertion order.
pub fn resolve_languages(version: &VersionDescriptor) -> Result<Vec<String>, PayloadError> {
    let languages = apply_rules(LANGUAGE_RULES, UNSUPPORTED_LANGUAGE_RANGES, version.version())?;
    Ok(languages.into_iter().map(str::to_string).collect())
}

/// Resolves the languages understood by the shell, which is a superset of
/// the core languages for any version.
pub fn resolve_shell_languages(_version: &VersionDescriptor) -> Vec<String> {
    let mut languages: Vec<String> = LANGUAGE_CATALOG.iter().map(|l| l.to_string()).collect();
    for extra in SHELL_ONLY_LANGUAGES {
        if !languages.iter().any(|l| l == extra) {
            languages.push(extra.to_string());
        }
    }
    languages
}

fn file_name(file: &PayloadFile, version: &VersionDescriptor) -> Result<String, PayloadError> {
    match file {
        PayloadFile::Fixed(name) => Ok((*name).to_string()),
        PayloadFile::UpdatePlugin { base, extension } => {
            let plugin_version =
                version
                    .update_plugin_version()
                    .ok_or_else(|| PayloadError::MissingPluginVersion {
                        file: format!("{base}.{extension}"),
                        version: version.to_string(),
                    })?;
            Ok(SignedFileInfo::new(base, extension, Some(plugin_version)).filename)
        }
    }
}

fn apply_rules<T: Copy + PartialEq>(
    rules: &[CompatibilityRule<T>],
    unsupported: &[UnsupportedRange],
    version: ProductVersion,
) -> Result<Vec<T>, PayloadError> {
    let oldest = rules.first().map(|rule| rule.min_version);
    let below_oldest = oldest.is_none_or(|min| version < min);
    if below_oldest || unsupported.iter().any(|range| range.contains(version)) {
        return Err(PayloadError::UnsupportedVersion {
            version: version.to_string(),
        });
    }

    let mut entries: Vec<T> = Vec::new();
    for rule in rules.iter().filter(|rule| rule.min_version <= version) {
        for item in rule.add {
            if !entries.contains(item) {
                entries.push(*item);
            }
        }
        entries.retain(|entry| !rule.remove.contains(entry));
    }
    Ok(entries)
}
