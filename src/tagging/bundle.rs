//! Bundle descriptions and per-bundle tagging.
//!
//! A bundle description holds one record per line:
//!
//! ```text
//! # exe_name, needs_admin, language, browser, usage_stats, apps
//! ('Chrome', 'True', 'en', 2, 1, [('{8A69D345-...}', 'Google Chrome', '')])
//! ```
//!
//! Records are Python literal tuples. They are parsed as data, never
//! evaluated. Files are UTF-8, or UTF-16LE when they start with a BOM.

use crate::bundler::Stage;
use crate::bundler::ErrorExt;
use crate::bundler::pool::run_blocking;
use crate::bundler::utils::fs::sha256_file;
use crate::error::TagError;
use crate::tagging::{BinaryTagger, TagPlacement, TagString};
use crate::version::RECOGNIZED_TEST_PREFIXES;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// One app inside a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleApp {
    /// App GUID, usually braced
    pub guid: String,
    /// Display name
    pub name: String,
    /// Additional parameters (`ap`), empty when absent
    pub ap: Option<String>,
}

/// A set of apps sharing one tag and delivery metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    /// Executable name stem, e.g. `Chrome`
    pub exe_name: String,
    /// `needsadmin` value for every app
    pub needs_admin: String,
    /// Installer language
    pub language: String,
    /// Browser type, if any
    pub browser: Option<String>,
    /// Usage-stats opt-in, if any
    pub usage_stats: Option<String>,
    /// Apps in bundle order
    pub apps: Vec<BundleApp>,
}

impl Bundle {
    /// The bundle's encoded tag.
    pub fn tag_string(&self) -> Result<String, TagError> {
        self.apps
            .iter()
            .fold(TagString::new(), |tag, app| {
                tag.app(&app.guid, &app.name, &self.needs_admin, app.ap.as_deref())
            })
            .usage_stats(self.usage_stats.as_deref())
            .browser(self.browser.as_deref())
            .lang(Some(&self.language))
            .build()
    }

    /// `Tagged_[TEST_]{exe}Setup_{lang}.exe`
    pub fn file_name(&self, test: bool) -> String {
        let test = if test { "TEST_" } else { "" };
        format!("Tagged_{test}{}Setup_{}.exe", self.exe_name, self.language)
    }

    /// Output path under `out_dir`, grouped by language.
    pub fn output_path(&self, out_dir: &Path, test: bool) -> PathBuf {
        out_dir.join(&self.language).join(self.file_name(test))
    }
}

/// Literal values accepted in bundle records.
#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Str(String),
    Int(i64),
    Bool(bool),
    None,
    Seq(Vec<Literal>),
}

impl Literal {
    fn is_truthy(&self) -> bool {
        match self {
            Literal::Str(s) => !s.is_empty(),
            Literal::Int(n) => *n != 0,
            Literal::Bool(b) => *b,
            Literal::None => false,
            Literal::Seq(items) => !items.is_empty(),
        }
    }

    /// Scalar as tag text; `None` for the `None` literal.
    fn text(&self) -> Option<String> {
        match self {
            Literal::Str(s) => Some(s.clone()),
            Literal::Int(n) => Some(n.to_string()),
            Literal::Bool(true) => Some("True".into()),
            Literal::Bool(false) => Some("False".into()),
            Literal::None | Literal::Seq(_) => None,
        }
    }
}

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str, line: usize) -> Self {
        Self {
            chars: text.chars().peekable(),
            line,
        }
    }

    fn error(&self, reason: impl Into<String>) -> TagError {
        TagError::InvalidBundle {
            line: self.line,
            reason: reason.into(),
        }
    }

    fn skip_ws(&mut self) {
        while self.chars.peek().is_some_and(|c| c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn expect(&mut self, want: char) -> Result<(), TagError> {
        self.skip_ws();
        match self.chars.next() {
            Some(c) if c == want => Ok(()),
            Some(c) => Err(self.error(format!("expected '{want}', found '{c}'"))),
            None => Err(self.error(format!("expected '{want}', found end of line"))),
        }
    }

    fn value(&mut self) -> Result<Literal, TagError> {
        self.skip_ws();
        match self.chars.peek().copied() {
            Some('(') => self.sequence('(', ')'),
            Some('[') => self.sequence('[', ']'),
            Some('\'') | Some('"') => self.string(),
            Some('u') | Some('U') => {
                self.chars.next();
                match self.chars.peek() {
                    Some('\'') | Some('"') => self.string(),
                    _ => Err(self.error("unexpected identifier")),
                }
            }
            Some(c) if c.is_ascii_digit() || c == '-' => self.integer(),
            Some(c) if c.is_ascii_alphabetic() => self.keyword(),
            Some(c) => Err(self.error(format!("unexpected character '{c}'"))),
            None => Err(self.error("unexpected end of line")),
        }
    }

    fn sequence(&mut self, open: char, close: char) -> Result<Literal, TagError> {
        self.expect(open)?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.chars.peek() == Some(&close) {
                self.chars.next();
                return Ok(Literal::Seq(items));
            }
            items.push(self.value()?);
            self.skip_ws();
            match self.chars.next() {
                Some(',') => continue,
                Some(c) if c == close => return Ok(Literal::Seq(items)),
                Some(c) => return Err(self.error(format!("expected ',' or '{close}', found '{c}'"))),
                None => return Err(self.error(format!("unterminated sequence, expected '{close}'"))),
            }
        }
    }

    fn string(&mut self) -> Result<Literal, TagError> {
        let quote = self.chars.next().ok_or_else(|| self.error("expected string"))?;
        let mut out = String::new();
        loop {
            match self.chars.next() {
                Some(c) if c == quote => return Ok(Literal::Str(out)),
                Some('\\') => match self.chars.next() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c) => out.push(c),
                    None => return Err(self.error("unterminated escape")),
                },
                Some(c) => out.push(c),
                None => return Err(self.error("unterminated string")),
            }
        }
    }

    fn integer(&mut self) -> Result<Literal, TagError> {
        let mut digits = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() || (c == '-' && digits.is_empty()) {
                digits.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        digits
            .parse()
            .map(Literal::Int)
            .map_err(|_| self.error(format!("invalid integer '{digits}'")))
    }

    fn keyword(&mut self) -> Result<Literal, TagError> {
        let mut word = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                word.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        match word.as_str() {
            "True" => Ok(Literal::Bool(true)),
            "False" => Ok(Literal::Bool(false)),
            "None" => Ok(Literal::None),
            _ => Err(self.error(format!("unknown name '{word}'"))),
        }
    }

    fn finish(mut self) -> Result<(), TagError> {
        self.skip_ws();
        match self.chars.next() {
            None => Ok(()),
            Some(c) => Err(self.error(format!("trailing character '{c}'"))),
        }
    }
}

fn required(fields: &[Literal], index: usize, what: &str, line: usize) -> Result<String, TagError> {
    fields
        .get(index)
        .and_then(Literal::text)
        .ok_or_else(|| TagError::InvalidBundle {
            line,
            reason: format!("{what} must be a string or number"),
        })
}

fn optional(fields: &[Literal], index: usize) -> Option<String> {
    fields.get(index).filter(|v| v.is_truthy()).and_then(Literal::text)
}

fn parse_record(text: &str, line: usize) -> Result<Bundle, TagError> {
    let mut parser = Parser::new(text, line);
    let record = parser.value()?;
    parser.finish()?;

    let invalid = |reason: &str| TagError::InvalidBundle {
        line,
        reason: reason.to_string(),
    };
    let Literal::Seq(fields) = record else {
        return Err(invalid("record must be a tuple"));
    };
    if fields.len() != 6 {
        return Err(invalid("record must have 6 fields"));
    }
    let Literal::Seq(raw_apps) = &fields[5] else {
        return Err(invalid("apps must be a list"));
    };

    let apps = raw_apps
        .iter()
        .map(|app| match app {
            Literal::Seq(parts) if (2..=3).contains(&parts.len()) => Ok(BundleApp {
                guid: required(parts, 0, "app guid", line)?,
                name: required(parts, 1, "app name", line)?,
                ap: optional(parts, 2),
            }),
            _ => Err(invalid("each app must be a (guid, name, ap) tuple")),
        })
        .collect::<Result<Vec<_>, _>>()?;
    if apps.is_empty() {
        return Err(invalid("bundle has no apps"));
    }

    Ok(Bundle {
        exe_name: required(&fields, 0, "executable name", line)?,
        needs_admin: required(&fields, 1, "needs_admin", line)?,
        language: required(&fields, 2, "language", line)?,
        browser: optional(&fields, 3),
        usage_stats: optional(&fields, 4),
        apps,
    })
}

/// Parses bundle records, skipping blank lines and `#` comments.
pub fn parse_bundles(text: &str) -> Result<Vec<Bundle>, TagError> {
    text.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(number, line)| parse_record(line, number))
        .collect()
}

/// Decodes UTF-8 (optionally BOM-prefixed) or BOM-prefixed UTF-16LE text.
pub fn decode_text(bytes: &[u8]) -> Result<String, TagError> {
    let invalid = |reason: &str| TagError::InvalidBundle {
        line: 0,
        reason: reason.to_string(),
    };
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        if rest.len() % 2 != 0 {
            return Err(invalid("odd byte count in UTF-16 file"));
        }
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16(&units).map_err(|_| invalid("invalid UTF-16"));
    }
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    String::from_utf8(bytes.to_vec()).map_err(|_| invalid("invalid UTF-8"))
}

/// Suffix dropped from a bundle description file name to name its output folder.
pub const BUNDLES_FILE_SUFFIX: &str = "_installers.txt";

/// Output folder for the bundles of one description file.
///
/// `chrome_installers.txt` tags into `chrome/`; other names lose their
/// extension.
pub fn bundles_folder(bundles_file: &Path) -> String {
    let lossy = |s: &std::ffi::OsStr| s.to_string_lossy().into_owned();
    let name = bundles_file.file_name().map(lossy).unwrap_or_default();
    match name.strip_suffix(BUNDLES_FILE_SUFFIX) {
        Some(stem) => stem.to_string(),
        None => bundles_file.file_stem().map(lossy).unwrap_or_default(),
    }
}

/// Whether `installer` is a test build, going by its file name prefix.
pub fn is_test_installer(installer: &Path) -> bool {
    installer.file_name().is_some_and(|name| {
        let name = name.to_string_lossy();
        RECOGNIZED_TEST_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
    })
}

/// Reads and parses a bundle description file.
pub fn read_bundles(path: &Path) -> crate::bundler::Result<Vec<Bundle>> {
    let bytes = std::fs::read(path).fs_context("reading bundle description", path)?;
    Ok(parse_bundles(&decode_text(&bytes)?)?)
}

/// A tagged bundle installer.
#[derive(Debug, Clone, Serialize)]
pub struct TaggedBundle {
    /// Bundle executable name
    pub exe_name: String,
    /// Bundle language
    pub language: String,
    /// Published path
    pub path: PathBuf,
    /// Tag length in bytes
    pub tag_len: usize,
    /// Where the tag went
    pub placement: TagPlacement,
    /// SHA-256 of the tagged file
    pub checksum: String,
}

/// Tags `input` once per bundle, in parallel, publishing under `out_dir`.
///
/// Results are in bundle order; a failing bundle does not stop the others.
pub async fn tag_bundles(
    tagger: &BinaryTagger,
    input: &Path,
    bundles: Vec<Bundle>,
    out_dir: &Path,
    test: bool,
    placement: Option<TagPlacement>,
    workers: usize,
) -> Vec<crate::bundler::Result<TaggedBundle>> {
    let jobs: Vec<_> = bundles
        .into_iter()
        .map(|bundle| {
            let tagger = tagger.clone();
            let input = input.to_path_buf();
            let output = bundle.output_path(out_dir, test);
            move || -> crate::bundler::Result<TaggedBundle> {
                let tag = bundle.tag_string()?;
                let placement = tagger
                    .tag_file(&input, &output, tag.as_bytes(), placement)
                    .map_err(|e| {
                        e.in_stage(Stage::Tag, format!("{} ({} byte tag)", output.display(), tag.len()))
                    })?;
                Ok(TaggedBundle {
                    checksum: sha256_file(&output)?,
                    exe_name: bundle.exe_name,
                    language: bundle.language,
                    path: output,
                    tag_len: tag.len(),
                    placement,
                })
            }
        })
        .collect();
    run_blocking(jobs, workers).await
}

/// Tags `input` once per bundle in `bundles_file`.
///
/// Outputs land in `out_dir/{folder}/{lang}/` with the folder taken from
/// [`bundles_folder`], so several description files can share `out_dir`.
/// Test naming follows the input's file name unless `test` overrides it.
pub async fn tag_bundles_file(
    tagger: &BinaryTagger,
    input: &Path,
    bundles_file: &Path,
    out_dir: &Path,
    test: Option<bool>,
    placement: Option<TagPlacement>,
    workers: usize,
) -> crate::bundler::Result<Vec<crate::bundler::Result<TaggedBundle>>> {
    let bundles = read_bundles(bundles_file)?;
    let folder = out_dir.join(bundles_folder(bundles_file));
    let test = test.unwrap_or_else(|| is_test_installer(input));
    log::info!(
        "Tagging {} with {} bundle(s) into {}",
        input.display(),
        bundles.len(),
        folder.display()
    );
    Ok(tag_bundles(tagger, input, bundles, &folder, test, placement, workers).await)
}
