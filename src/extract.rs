// The `extract` module pulls actionable URLs out of a message body.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Bare URLs in plain text. The character class stops at whitespace and the
/// delimiters mail clients typically wrap links in.
static BARE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)https?://[^\s<>"');,]+"#).expect("bare url pattern"));

/// `href` attributes in HTML bodies.
static HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)href=['"]([^'"]+)['"]"#).expect("href pattern"));

/// Angle-bracket URLs, the plain-text convention for long links.
static ANGLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<(https?://[^>]+)>").expect("angle pattern"));

/// Full anchor elements, capturing the href and the visible anchor text.
static ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\s[^>]*href=['"]([^'"]+)['"][^>]*>(.*?)</a>"#).expect("anchor pattern")
});

/// Inner markup inside anchor text.
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("tag pattern"));

/// Extracts every URL from a message body in first-seen order, without
/// duplicates. Tolerates plain-text and HTML bodies, quoted-printable soft
/// line breaks, and HTML-escaped URLs (the returned URLs are unescaped).
/// Returns an empty vec when the body holds no links.
pub fn extract(body: &str) -> Vec<String> {
    if body.is_empty() {
        return Vec::new();
    }

    let cleaned = clean(body);

    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    let candidates = BARE_URL
        .find_iter(&cleaned)
        .map(|m| m.as_str().to_string())
        .chain(
            HREF.captures_iter(&cleaned)
                .map(|c| c[1].to_string()),
        )
        .chain(
            ANGLE
                .captures_iter(&cleaned)
                .map(|c| c[1].to_string()),
        );

    for candidate in candidates {
        if let Some(url) = normalize(&candidate) {
            if seen.insert(url.clone()) {
                urls.push(url);
            }
        }
    }

    urls
}

/// Extracts `(url, anchor text)` pairs in first-seen order. HTML anchors keep
/// their visible text (inner markup stripped, whitespace collapsed); bare
/// URLs outside anchors get an empty label.
pub fn extract_labeled(body: &str) -> Vec<(String, String)> {
    if body.is_empty() {
        return Vec::new();
    }

    let cleaned = clean(body);

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for captures in ANCHOR.captures_iter(&cleaned) {
        let Some(url) = normalize(&captures[1]) else {
            continue;
        };
        if seen.insert(url.clone()) {
            let label = anchor_label(&captures[2]);
            links.push((url, label));
        }
    }

    for m in BARE_URL.find_iter(&cleaned) {
        let Some(url) = normalize(m.as_str()) else {
            continue;
        };
        if seen.insert(url.clone()) {
            links.push((url, String::new()));
        }
    }

    links
}

/// Removes quoted-printable soft line breaks so URLs split across lines
/// reassemble, and unescapes HTML entities before matching so an escaped
/// `&amp;` inside an URL cannot truncate the bare-URL pattern.
fn clean(body: &str) -> String {
    unescape_entities(&body.replace("=\r\n", "").replace("=\n", ""))
}

/// Trims over-captured trailing punctuation and rejects anything that is not
/// an absolute http(s) URL.
fn normalize(candidate: &str) -> Option<String> {
    let mut url = candidate.to_string();
    while url
        .chars()
        .last()
        .is_some_and(|c| matches!(c, '>' | '\'' | '"' | ')' | ';' | ',' | '.'))
    {
        url.pop();
    }
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        Some(url)
    } else {
        None
    }
}

fn unescape_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

fn anchor_label(inner: &str) -> String {
    TAG.replace_all(inner, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
