//! Fallback search for an unsubscribe link inside a message body.
//!
//! Used only when a sender's headers offered no mechanism. A miss is a
//! normal outcome and yields `None`.

use once_cell::sync::Lazy;
use regex::Regex;

/// Bytes of context scanned on each side of a keyword hit.
const KEYWORD_WINDOW: usize = 250;

const KEYWORDS: [&str; 7] = [
    "unsubscribe",
    "opt-out",
    "opt out",
    "remove me",
    "stop emails",
    "manage preferences",
    "email preferences",
];

const REJECT_FRAGMENTS: [&str; 3] = ["track", "pixel", "open"];
const REJECT_EXTENSIONS: [&str; 5] = [".gif", ".png", ".jpg", ".jpeg", ".webp"];

#[allow(clippy::expect_used)]
static HREF_WITH_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)href=["'](https?://[^"']+(?:unsubscribe|opt[-_]?out|remove|preferences|unsub)[^"']*)["']"#)
        .expect("valid href pattern")
});

#[allow(clippy::expect_used)]
static BARE_URL_WITH_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(https?://[^\s<>"]+(?:unsubscribe|opt[-_]?out|remove|preferences|unsub)[^\s<>"]*)"#)
        .expect("valid bare url pattern")
});

#[allow(clippy::expect_used)]
static HREF_WITH_KEYWORD_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)href=["'](https?://[^"']+)["'][^>]*>[^<]*(?:unsubscribe|opt[-_]?out|remove|stop\s+emails?|manage\s+preferences)[^<]*</a>"#)
        .expect("valid link text pattern")
});

#[allow(clippy::expect_used)]
static ANY_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)https?://[^\s<>"']+"#).expect("valid url pattern"));

/// First plausible unsubscribe URL in `body`, skipping tracking pixels and images.
pub fn scan_body_for_unsubscribe_link(body: &str) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    candidates(body).into_iter().find(|url| is_usable(url))
}

fn candidates(body: &str) -> Vec<String> {
    let mut found = Vec::new();

    for pattern in [&*HREF_WITH_KEYWORD, &*BARE_URL_WITH_KEYWORD, &*HREF_WITH_KEYWORD_TEXT] {
        for caps in pattern.captures_iter(body) {
            if let Some(url) = caps.get(1) {
                found.push(url.as_str().to_string());
            }
        }
    }

    // ASCII lowering keeps byte offsets aligned with `body`.
    let lower = body.to_ascii_lowercase();
    for keyword in KEYWORDS {
        let Some(hit) = lower.find(keyword) else {
            continue;
        };
        let start = floor_boundary(body, hit.saturating_sub(KEYWORD_WINDOW));
        let end = ceil_boundary(body, (hit + KEYWORD_WINDOW).min(body.len()));
        if let Some(url) = ANY_URL.find(&body[start..end]) {
            found.push(url.as_str().to_string());
        }
    }

    found
}

fn is_usable(url: &str) -> bool {
    let lower = url.to_lowercase();
    !REJECT_FRAGMENTS.iter().any(|f| lower.contains(f))
        && !REJECT_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

fn floor_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_boundary(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}
