//! Normalized sender fields from a raw metadata record.

use chrono::{DateTime, Utc};
use quietinbox_domain::{Category, ParsedMessage, RawMessage};
use tracing::debug;

use crate::safety::{check_safety, SafetyRules};
use crate::unsubscribe::detect_unsubscribe_method;

/// Headers the scan asks the message source for.
pub const METADATA_HEADERS: [&str; 6] = [
    "From",
    "Date",
    "Subject",
    "List-Unsubscribe",
    "List-Unsubscribe-Post",
    "List-Id",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub email: String,
    pub domain: String,
    pub display_name: String,
}

/// Classify one raw record. Never fails; missing headers degrade to defaults.
pub fn parse_message(raw: &RawMessage, rules: &SafetyRules) -> ParsedMessage {
    let headers = &raw.headers;
    let from = headers.get("From").unwrap_or_default();
    let subject = headers.get("Subject").unwrap_or_default();
    let list_id = headers
        .get("List-Id")
        .filter(|v| !v.trim().is_empty())
        .map(|v| v.to_string());

    let sender = parse_sender(from);
    let date = parse_date(headers.get("Date")).unwrap_or_else(|| {
        debug!(id = %raw.id, "missing or unparseable Date header, using now");
        Utc::now()
    });

    ParsedMessage {
        id: raw.id.clone(),
        from: from.to_string(),
        email: sender.email,
        domain: sender.domain,
        display_name: sender.display_name,
        subject: subject.to_string(),
        date,
        list_id,
        unsubscribe: detect_unsubscribe_method(headers),
        safety: check_safety(from, subject, rules),
        category: category_from_labels(&raw.labels),
    }
}

pub fn parse_sender(from: &str) -> Sender {
    let email = extract_email(from);
    let domain = extract_domain(&email);
    Sender {
        domain,
        display_name: extract_display_name(from),
        email,
    }
}

/// `<...>` content, else the first `local@host` word, else the whole input; lowercased.
pub fn extract_email(from: &str) -> String {
    first_bracketed(from)
        .or_else(|| first_address_word(from))
        .map(|s| s.trim().to_lowercase())
        .unwrap_or_else(|| from.to_lowercase())
}

/// Host part after the last `@`, minus a trailing `>`; the whole lowered input otherwise.
pub fn extract_domain(email: &str) -> String {
    if let Some(at) = email.rfind('@') {
        let host = &email[at + 1..];
        let host = host.strip_suffix('>').unwrap_or(host);
        if !host.is_empty() && !host.contains('>') {
            return host.trim().to_lowercase();
        }
    }
    email.to_lowercase()
}

/// Quoted name, else text before `<`, else the address itself.
pub fn extract_display_name(from: &str) -> String {
    if let Some(quoted) = first_quoted(from).map(str::trim).filter(|s| !s.is_empty()) {
        return quoted.to_string();
    }

    if let Some(lt) = from.find('<') {
        let before = from[..lt].trim();
        if !before.is_empty() {
            return before.to_string();
        }
    }

    if let Some(addr) = first_bracketed(from).or_else(|| first_address_word(from)) {
        let addr = addr.trim();
        if !addr.is_empty() {
            return addr.to_string();
        }
    }

    from.trim().to_string()
}

/// Strips angle brackets and lowercases, so `<News.Example.com>` becomes `news.example.com`.
pub fn normalize_list_id(list_id: &str) -> String {
    first_bracketed(list_id)
        .unwrap_or(list_id)
        .trim()
        .to_lowercase()
}

/// Promotions wins over Forums, Forums over Updates.
pub fn category_from_labels(labels: &[String]) -> Option<Category> {
    Category::ALL
        .into_iter()
        .find(|c| labels.iter().any(|l| l == c.label()))
}

/// RFC 2822 first, then RFC 3339. A trailing `(UTC)`-style comment is ignored.
pub fn parse_date(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() {
        return None;
    }

    let without_comment = match trimmed.rfind(" (") {
        Some(idx) if trimmed.ends_with(')') => trimmed[..idx].trim_end(),
        _ => trimmed,
    };

    for candidate in [trimmed, without_comment] {
        if let Ok(dt) = DateTime::parse_from_rfc2822(candidate) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(candidate) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    None
}

/// Every non-empty `<...>` span, left to right.
pub(crate) fn bracketed_tokens(s: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut rest = s;
    while let Some(open) = rest.find('<') {
        let after = &rest[open + 1..];
        match after.find('>') {
            Some(0) => rest = &after[1..],
            Some(close) => {
                tokens.push(&after[..close]);
                rest = &after[close + 1..];
            }
            None => break,
        }
    }
    tokens
}

fn first_bracketed(s: &str) -> Option<&str> {
    bracketed_tokens(s).into_iter().next()
}

fn first_quoted(s: &str) -> Option<&str> {
    let mut rest = s;
    while let Some(open) = rest.find('"') {
        let after = &rest[open + 1..];
        match after.find('"') {
            Some(0) => rest = &after[1..],
            Some(close) => return Some(&after[..close]),
            None => return None,
        }
    }
    None
}

fn first_address_word(s: &str) -> Option<&str> {
    s.split_whitespace().find(|word| {
        word.char_indices()
            .any(|(i, c)| c == '@' && i > 0 && i + 1 < word.len())
    })
}
