use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::{Captures, Regex};
use reqwest::Url;

use crate::model::{CreationDate, SourcePost};

pub const UNKNOWN_DATE: &str = "Unknown Date";
pub const NOTE_MARKER: &str = "> [!NOTE]";
pub const IMAGE_PLACEHOLDER_PREFIX: &str = "IMAGE:";

static MARKDOWN_IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]+)\)").expect("valid markdown image regex"));
static HTML_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<img\s[^>]*?src\s*=\s*["']([^"'>]+)["'][^>]*>"#).expect("valid img regex")
});

/// What the original author did; rendered into the attribution header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Asked,
    Answered,
    CommentedOn,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asked => "asked",
            Self::Answered => "answered",
            Self::CommentedOn => "commented on",
        }
    }

    /// Leading text of the header line, used to classify remote comments.
    pub fn marker(self) -> String {
        format!("Originally {} by", self.as_str())
    }
}

pub fn decode_entities_opt(text: Option<&str>) -> Option<String> {
    text.map(decode_entities)
}

/// Reverse HTML character-reference encoding (named and numeric).
pub fn decode_entities(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(index) = rest.find('&') {
        output.push_str(&rest[..index]);
        rest = &rest[index..];
        match decode_reference(rest) {
            Some((decoded, consumed)) => {
                output.push_str(&decoded);
                rest = &rest[consumed..];
            }
            None => {
                output.push('&');
                rest = &rest[1..];
            }
        }
    }
    output.push_str(rest);
    output
}

/// Decode the reference at the start of `text` (which begins with `&`).
fn decode_reference(text: &str) -> Option<(String, usize)> {
    let body = &text[1..];
    if let Some(numeric) = body.strip_prefix('#') {
        let (digits, radix, prefix_len) = match numeric.strip_prefix(['x', 'X']) {
            Some(hex) => (hex, 16, 3),
            None => (numeric, 10, 2),
        };
        let len = digits
            .char_indices()
            .find(|(_, ch)| !ch.is_digit(radix))
            .map(|(index, _)| index)
            .unwrap_or(digits.len());
        if len == 0 {
            return None;
        }
        let code = u32::from_str_radix(&digits[..len], radix).unwrap_or(u32::MAX);
        let ch = match code {
            0 => char::REPLACEMENT_CHARACTER,
            code => char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER),
        };
        let semicolon = usize::from(digits[len..].starts_with(';'));
        return Some((ch.to_string(), prefix_len + len + semicolon));
    }

    let len = body
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_alphanumeric())
        .map(|(index, _)| index)
        .unwrap_or(body.len());
    let name = &body[..len];
    let terminated = body[len..].starts_with(';');
    if terminated && let Some(decoded) = named_entity(name) {
        return Some((decoded.to_string(), len + 2));
    }
    // Legacy references are recognized without a trailing semicolon.
    for legacy in ["amp", "lt", "gt", "quot", "nbsp", "copy", "reg"] {
        if name.starts_with(legacy) {
            let decoded = named_entity(legacy)?;
            return Some((decoded.to_string(), legacy.len() + 1));
        }
    }
    None
}

fn named_entity(name: &str) -> Option<&'static str> {
    Some(match name {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => "\u{a0}",
        "copy" => "©",
        "reg" => "®",
        "trade" => "™",
        "hellip" => "…",
        "mdash" => "—",
        "ndash" => "–",
        "lsquo" => "‘",
        "rsquo" => "’",
        "ldquo" => "“",
        "rdquo" => "”",
        "laquo" => "«",
        "raquo" => "»",
        "bull" => "•",
        "middot" => "·",
        "deg" => "°",
        "times" => "×",
        "divide" => "÷",
        "plusmn" => "±",
        "euro" => "€",
        "cent" => "¢",
        "pound" => "£",
        "yen" => "¥",
        "sect" => "§",
        "para" => "¶",
        _ => return None,
    })
}

/// Every image URL referenced through `![alt](url)` or `<img src="url">`.
pub fn extract_image_refs(text: &str) -> BTreeSet<String> {
    let mut urls = BTreeSet::new();
    for captures in MARKDOWN_IMAGE.captures_iter(text) {
        if let Some(url) = captures.get(2) {
            urls.insert(url.as_str().to_string());
        }
    }
    for captures in HTML_IMAGE.captures_iter(text) {
        if let Some(url) = captures.get(1) {
            urls.insert(url.as_str().to_string());
        }
    }
    urls
}

/// Replace mapped image URLs; unmapped references are left untouched.
pub fn rewrite_image_refs(text: &str, url_map: &BTreeMap<String, String>) -> String {
    let replace = |url: &str| url_map.get(url).cloned();
    let text = replace_capture(&MARKDOWN_IMAGE, text, 2, &replace);
    replace_capture(&HTML_IMAGE, &text, 1, &replace)
}

/// Filename of an image URL: last path segment without query or fragment.
pub fn image_filename(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or_default();
    without_query
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

pub fn image_filenames(text: &str) -> BTreeSet<String> {
    extract_image_refs(text)
        .iter()
        .map(|url| image_filename(url))
        .collect()
}

/// Swap every image URL for a filename-only placeholder so re-hosted copies compare equal.
pub fn normalize_image_urls(text: &str) -> String {
    let placeholder = |url: &str| Some(format!("{IMAGE_PLACEHOLDER_PREFIX}{}", image_filename(url)));
    let text = replace_capture(&MARKDOWN_IMAGE, text, 2, &placeholder);
    replace_capture(&HTML_IMAGE, &text, 1, &placeholder)
}

pub fn strip_image_markup(text: &str) -> String {
    let text = MARKDOWN_IMAGE.replace_all(text, "");
    HTML_IMAGE.replace_all(&text, "").into_owned()
}

fn replace_capture(
    regex: &Regex,
    text: &str,
    group: usize,
    replacement: &dyn Fn(&str) -> Option<String>,
) -> String {
    regex
        .replace_all(text, |captures: &Captures| {
            let whole = &captures[0];
            let Some(target) = captures.get(group) else {
                return whole.to_string();
            };
            let Some(replaced) = replacement(target.as_str()) else {
                return whole.to_string();
            };
            let offset = captures.get(0).map(|m| m.start()).unwrap_or_default();
            let start = target.start() - offset;
            let end = target.end() - offset;
            format!("{}{}{}", &whole[..start], replaced, &whole[end..])
        })
        .into_owned()
}

/// Parse the ISO-8601-like shapes seen in exports.
pub fn parse_timestamp_text(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    let naive = text.trim_end_matches('Z').trim_end_matches(" UTC");
    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(naive, format) {
            return Some(parsed.and_utc());
        }
    }
    NaiveDate::parse_from_str(naive, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|parsed| parsed.and_utc())
}

/// `Mon DD, YYYY at HH:MM UTC`, or `Unknown Date` for missing, zero or unparseable values.
pub fn readable_timestamp(value: &CreationDate) -> String {
    let parsed = match value {
        CreationDate::Epoch(0) | CreationDate::Missing => None,
        CreationDate::Epoch(seconds) => DateTime::from_timestamp(*seconds, 0),
        CreationDate::Text(text) => parse_timestamp_text(text),
    };
    parsed
        .map(|parsed| parsed.format("%b %d, %Y at %H:%M UTC").to_string())
        .unwrap_or_else(|| UNKNOWN_DATE.to_string())
}

pub fn vote_label(score: i64) -> String {
    if score == 1 {
        "1 vote".to_string()
    } else {
        format!("{score} votes")
    }
}

pub fn attribution_header(item: &impl SourcePost, action: Action) -> String {
    format!(
        "{NOTE_MARKER}\n> {} {} on {}\n> {}\n\n",
        action.marker(),
        item.author_name(),
        readable_timestamp(item.created()),
        vote_label(item.score())
    )
}

/// Remove the leading attribution block written by `attribution_header`, if present.
/// Quoted lines after the block belong to the body and are kept.
pub fn strip_attribution_header(body: &str) -> &str {
    let rest = body.trim_start();
    let mut lines = rest.split_inclusive('\n');
    match lines.next() {
        Some(first) if first.trim() == NOTE_MARKER => {
            let mut offset = first.len();
            let expected: [fn(&str) -> bool; 3] = [
                |line| line.starts_with("> Originally "),
                |line| line.starts_with('>') && (line.ends_with(" vote") || line.ends_with(" votes")),
                str::is_empty,
            ];
            for (line, matches) in lines.zip(expected) {
                if !matches(line.trim()) {
                    break;
                }
                offset += line.len();
            }
            &rest[offset..]
        }
        _ => body,
    }
}

/// `redir <path[#fragment]> <remote_url> permanent`; the query string is dropped.
pub fn redirect_line(legacy_url: &str, remote_url: &str) -> Result<String> {
    let parsed = Url::parse(legacy_url)
        .with_context(|| format!("invalid legacy URL: {legacy_url}"))?;
    let mut path = parsed.path().to_string();
    if let Some(fragment) = parsed.fragment().filter(|fragment| !fragment.is_empty()) {
        path.push('#');
        path.push_str(fragment);
    }
    Ok(format!("redir {path} {remote_url} permanent"))
}
