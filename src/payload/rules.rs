//! Version-gated compatibility tables.
//!
//! Each table is an ordered list of rules. A rule applies to every version at
//! or above its minimum; rules apply in ascending order, so a later rule may
//! re-add what an earlier one removed. Adding support for a new release is a
//! matter of appending a row.

use crate::version::ProductVersion;

/// A payload file, named before the build's file prefix is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFile {
    /// A fixed filename
    Fixed(&'static str),
    /// `{base}{update_plugin_version}.{ext}`
    UpdatePlugin {
        /// Base name without version
        base: &'static str,
        /// Extension without dot
        extension: &'static str,
    },
}

/// One row of a compatibility table.
#[derive(Debug, Clone, Copy)]
pub struct CompatibilityRule<T: 'static> {
    /// First version the rule applies to
    pub min_version: ProductVersion,
    /// Entries appended when the rule applies
    pub add: &'static [T],
    /// Entries removed when the rule applies
    pub remove: &'static [T],
}

/// Half-open version range `[from, until)` that no release supports.
#[derive(Debug, Clone, Copy)]
pub struct UnsupportedRange {
    /// Inclusive start
    pub from: ProductVersion,
    /// Exclusive end
    pub until: ProductVersion,
}

impl UnsupportedRange {
    /// Whether `version` falls inside the range.
    pub fn contains(&self, version: ProductVersion) -> bool {
        self.from <= version && version < self.until
    }
}

const UPDATE_PLUGIN: PayloadFile = PayloadFile::UpdatePlugin {
    base: "npGoogleUpdate",
    extension: "dll",
};
const BHO: PayloadFile = PayloadFile::Fixed("GoopdateBho.dll");

/// Prefix of per-language resource libraries.
pub const RESOURCE_DLL_PREFIX: &str = "goopdateres_";

/// Payload file rules. Within a rule, additions apply before removals.
pub const FILE_RULES: &[CompatibilityRule<PayloadFile>] = &[
    CompatibilityRule {
        min_version: ProductVersion::new(1, 2, 183, 0),
        add: &[
            PayloadFile::Fixed("GoogleUpdate.exe"),
            PayloadFile::Fixed("GoogleCrashHandler.exe"),
            PayloadFile::Fixed("goopdate.dll"),
            BHO,
            PayloadFile::Fixed("GoogleUpdateHelper.msi"),
            PayloadFile::Fixed("GoogleUpdateWebPlugin.exe"),
        ],
        remove: &[],
    },
    CompatibilityRule {
        min_version: ProductVersion::new(1, 3, 13, 0),
        add: &[
            UPDATE_PLUGIN,
            PayloadFile::Fixed("GoogleUpdateBroker.exe"),
            PayloadFile::Fixed("GoogleUpdateOnDemand.exe"),
            PayloadFile::Fixed("GoogleUpdateComRegisterShell64.exe"),
            PayloadFile::Fixed("psmachine.dll"),
            PayloadFile::Fixed("psmachine_64.dll"),
            PayloadFile::Fixed("psuser.dll"),
            PayloadFile::Fixed("psuser_64.dll"),
        ],
        remove: &[BHO],
    },
    CompatibilityRule {
        min_version: ProductVersion::new(1, 3, 21, 85),
        add: &[PayloadFile::Fixed("GoogleCrashHandler64.exe")],
        remove: &[],
    },
    CompatibilityRule {
        min_version: ProductVersion::new(1, 3, 32, 0),
        add: &[PayloadFile::Fixed("GoogleUpdateCore.exe")],
        remove: &[],
    },
];

/// Releases between the 1.2 line and 1.3.13 shipped no supported payload.
pub const UNSUPPORTED_FILE_RANGES: &[UnsupportedRange] = &[UnsupportedRange {
    from: ProductVersion::new(1, 3, 0, 0),
    until: ProductVersion::new(1, 3, 13, 0),
}];

/// Every language the resource libraries have been translated into.
pub const LANGUAGE_CATALOG: &[&str] = &[
    "am", "ar", "bg", "bn", "ca", "cs", "da", "de", "el", "en", "en-GB", "es", "es-419", "et",
    "fa", "fi", "fil", "fr", "gu", "hi", "hr", "hu", "id", "is", "it", "iw", "ja", "kn", "ko",
    "lt", "lv", "ml", "mr", "ms", "nl", "no", "pl", "pt-BR", "pt-PT", "ro", "ru", "sk", "sl",
    "sr", "sv", "sw", "ta", "te", "th", "tr", "uk", "ur", "vi", "zh-CN", "zh-TW",
];

const LEGACY_ONLY_LANGUAGES: &[&str] = &["or"];
const MODERN_ONLY_LANGUAGES: &[&str] = &["am", "sw"];

/// Shell-only locales, including the synthetic OS-default locale.
pub const SHELL_ONLY_LANGUAGES: &[&str] = &["or", "userdefault", "zh-HK"];

/// Language rules. Within a rule, additions apply before removals.
pub const LANGUAGE_RULES: &[CompatibilityRule<&str>] = &[
    CompatibilityRule {
        min_version: ProductVersion::new(1, 2, 183, 0),
        add: LANGUAGE_CATALOG,
        remove: MODERN_ONLY_LANGUAGES,
    },
    CompatibilityRule {
        min_version: ProductVersion::new(1, 2, 183, 0),
        add: LEGACY_ONLY_LANGUAGES,
        remove: &[],
    },
    CompatibilityRule {
        min_version: ProductVersion::new(1, 3, 21, 0),
        add: MODERN_ONLY_LANGUAGES,
        remove: LEGACY_ONLY_LANGUAGES,
    },
];

/// Releases without a known language table.
pub const UNSUPPORTED_LANGUAGE_RANGES: &[UnsupportedRange] = &[UnsupportedRange {
    from: ProductVersion::new(1, 3, 0, 0),
    until: ProductVersion::new(1, 3, 21, 0),
}];
