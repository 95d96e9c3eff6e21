/// Naming of a payload file before and after signing.
///
/// Versioned files embed their file version between base name and
/// extension (`npGoogleUpdate3.dll`); the pre-signing intermediate appends
/// `_unsigned` to the unversioned base name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedFileInfo {
    /// Final (signed) filename
    pub filename: String,
    /// Intermediate filename produced before signing
    pub unsigned_filename: String,
}

impl SignedFileInfo {
    /// Builds the names for `base_name.extension`, optionally versioned.
    pub fn new(base_name: &str, extension: &str, file_version: Option<u32>) -> Self {
        let filename = match file_version {
            Some(version) => format!("{base_name}{version}.{extension}"),
            None => format!("{base_name}.{extension}"),
        };
        Self {
            filename,
            unsigned_filename: format!("{base_name}_unsigned.{extension}"),
        }
    }
}
