//! Tag string encoding.
//!
//! A tag is an `&`-joined `key=value` list. Per-app keys (`appguid`,
//! `appname`, `needsadmin`, optional `ap`) repeat for every app in bundle
//! order, then the bundle-level keys follow in the order `usagestats`,
//! `browser`, `lang`.

use crate::error::TagError;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use regex::Regex;
use std::sync::LazyLock;

/// Bytes left unescaped in values.
const VALUE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'/')
    .remove(b'{')
    .remove(b'}');

static TAG_SAFE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-%{}/&=._A-Za-z0-9]*$").expect("tag-safe regex is valid"));

/// Percent-encodes a UTF-8 value.
pub fn encode_value(value: &str) -> String {
    utf8_percent_encode(value, VALUE_SET).to_string()
}

/// Whether `tag` only uses characters the bootstrap accepts.
pub fn is_tag_safe(tag: &str) -> bool {
    TAG_SAFE.is_match(tag)
}

/// Splits a tag into decoded `(key, value)` pairs.
pub fn parse(tag: &str) -> Vec<(String, String)> {
    tag.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key.to_string(), percent_decode_str(value).decode_utf8_lossy().into_owned())
        })
        .collect()
}

/// Builder for a bundle's tag string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagString {
    apps: Vec<Vec<(&'static str, String)>>,
    usage_stats: Option<String>,
    browser: Option<String>,
    lang: Option<String>,
}

impl TagString {
    /// Empty tag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an app.
    pub fn app(mut self, guid: &str, name: &str, needs_admin: &str, ap: Option<&str>) -> Self {
        let mut fields = vec![
            ("appguid", guid.to_string()),
            ("appname", name.to_string()),
            ("needsadmin", needs_admin.to_string()),
        ];
        if let Some(ap) = ap.filter(|ap| !ap.is_empty()) {
            fields.push(("ap", ap.to_string()));
        }
        self.apps.push(fields);
        self
    }

    /// Sets the usage-stats opt-in.
    pub fn usage_stats(mut self, value: Option<&str>) -> Self {
        self.usage_stats = value.filter(|v| !v.is_empty()).map(str::to_string);
        self
    }

    /// Sets the browser type.
    pub fn browser(mut self, value: Option<&str>) -> Self {
        self.browser = value.filter(|v| !v.is_empty()).map(str::to_string);
        self
    }

    /// Sets the installer language.
    pub fn lang(mut self, value: Option<&str>) -> Self {
        self.lang = value.filter(|v| !v.is_empty()).map(str::to_string);
        self
    }

    /// Encodes and validates the tag.
    pub fn build(&self) -> Result<String, TagError> {
        let bundle_fields = [
            ("usagestats", &self.usage_stats),
            ("browser", &self.browser),
            ("lang", &self.lang),
        ];
        let tag = self
            .apps
            .iter()
            .flatten()
            .map(|(key, value)| (*key, value.as_str()))
            .chain(
                bundle_fields
                    .iter()
                    .filter_map(|(key, value)| value.as_deref().map(|v| (*key, v))),
            )
            .map(|(key, value)| format!("{key}={}", encode_value(value)))
            .collect::<Vec<_>>()
            .join("&");

        if !is_tag_safe(&tag) {
            return Err(TagError::InvalidTagString { tag });
        }
        Ok(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUID: &str = "{8A69D345-D564-463C-AFF1-A69D9E530F96}";

    #[test]
    fn test_single_app_order() {
        let tag = TagString::new()
            .app(GUID, "Google Chrome", "True", None)
            .usage_stats(Some("1"))
            .browser(Some("2"))
            .lang(Some("en"))
            .build()
            .unwrap();
        assert_eq!(
            tag,
            format!("appguid={GUID}&appname=Google%20Chrome&needsadmin=True&usagestats=1&browser=2&lang=en")
        );
    }

    #[test]
    fn test_apps_repeat_in_bundle_order() {
        let tag = TagString::new()
            .app("{A}", "One", "False", Some("beta"))
            .app("{B}", "Two", "False", None)
            .lang(Some("fr"))
            .build()
            .unwrap();
        assert_eq!(
            tag,
            "appguid={A}&appname=One&needsadmin=False&ap=beta&appguid={B}&appname=Two&needsadmin=False&lang=fr"
        );
    }

    #[test]
    fn test_empty_optional_fields_are_omitted() {
        let tag = TagString::new()
            .app("{A}", "One", "True", Some(""))
            .usage_stats(Some(""))
            .browser(None)
            .build()
            .unwrap();
        assert_eq!(tag, "appguid={A}&appname=One&needsadmin=True");
    }

    #[test]
    fn test_utf8_names_are_percent_encoded() {
        assert_eq!(encode_value("Café & Co"), "Caf%C3%A9%20%26%20Co");
        assert_eq!(encode_value("a/b_c.d-e"), "a/b_c.d-e");
        let tag = TagString::new().app("{A}", "日本", "True", None).build().unwrap();
        assert!(is_tag_safe(&tag));
    }

    #[test]
    fn test_parse_decodes_values() {
        let pairs = parse("appguid={A}&appname=Google%20Earth&lang=en");
        assert_eq!(pairs[1], ("appname".to_string(), "Google Earth".to_string()));
        assert_eq!(pairs.len(), 3);
    }

    #[test]
    fn test_tag_safe_set() {
        assert!(is_tag_safe("appguid={x}&lang=en-GB"));
        assert!(!is_tag_safe("appname=a b"));
        assert!(!is_tag_safe("x=\"quoted\""));
    }
}
