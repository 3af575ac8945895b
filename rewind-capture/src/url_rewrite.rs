//! URL absolution for serialized attributes and stylesheet text.
//!
//! Replay happens on another origin, so every relative reference captured
//! from the page is resolved against the document base first. Anything that
//! does not parse is passed through untouched.

use regex::{Captures, Regex};
use std::sync::LazyLock;
use url::Url;

static CSS_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"url\(\s*(?:'([^']*)'|"([^"]*)"|([^)]*?))\s*\)"#).expect("static regex")
});

/// Resolve `value` against `base`. Empty values and fragments stay as-is.
pub fn absolute_url(value: &str, base: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return value.to_string();
    }
    match Url::parse(base) {
        Ok(base) => base
            .join(trimmed)
            .map(String::from)
            .unwrap_or_else(|_| value.to_string()),
        Err(_) => Url::parse(trimmed)
            .map(String::from)
            .unwrap_or_else(|_| value.to_string()),
    }
}

/// Absolutize every candidate of a `srcset` attribute.
///
/// ```text
///  "a.png 1x, /b.png 2x"  ─▸  "https://host/a.png 1x, https://host/b.png 2x"
/// ```
pub fn absolutize_srcset(srcset: &str, base: &str) -> String {
    map_srcset(srcset, |url| absolute_url(url, base))
}

/// Rewrite each candidate URL of a `srcset`, keeping descriptors.
pub fn map_srcset(srcset: &str, mut rewrite: impl FnMut(&str) -> String) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut rest = srcset;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        if rest.is_empty() {
            break;
        }
        let url_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let mut url = &rest[..url_end];
        rest = &rest[url_end..];

        let descriptor = if let Some(stripped) = url.strip_suffix(',') {
            url = stripped.trim_end_matches(',');
            ""
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            let descriptor = rest[..end].trim();
            rest = &rest[end..];
            descriptor
        };

        let rewritten = rewrite(url);
        if descriptor.is_empty() {
            out.push(rewritten);
        } else {
            out.push(format!("{rewritten} {descriptor}"));
        }
    }
    out.join(", ")
}

/// Absolutize `url(...)` references inside CSS text.
pub fn absolutize_css(css: &str, base: &str) -> String {
    if !css.contains("url(") {
        return css.to_string();
    }
    CSS_URL_RE
        .replace_all(css, |caps: &Captures| {
            let (quote, raw) = if let Some(m) = caps.get(1) {
                ("'", m.as_str())
            } else if let Some(m) = caps.get(2) {
                ("\"", m.as_str())
            } else {
                ("", caps.get(3).map_or("", |m| m.as_str()))
            };
            if raw.is_empty() || raw.starts_with("data:") {
                return caps[0].to_string();
            }
            format!("url({quote}{}{quote})", absolute_url(raw, base))
        })
        .into_owned()
}
