//! List-Unsubscribe / List-Unsubscribe-Post classification (RFC 2369, RFC 8058).

use quietinbox_domain::{Headers, Mechanism, UnsubscribeMethod};

use crate::headers::bracketed_tokens;

const ONE_CLICK_MARKER: &str = "list-unsubscribe=one-click";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListUnsubscribe {
    pub http: Option<String>,
    pub mailto: Option<String>,
}

/// Splits a List-Unsubscribe value into its http and mailto targets.
///
/// When several targets share a scheme the last one wins.
pub fn parse_list_unsubscribe(value: &str) -> ListUnsubscribe {
    let mut parsed = ListUnsubscribe::default();
    for token in bracketed_tokens(value) {
        let target = token.trim();
        let lower = target.to_ascii_lowercase();
        if lower.starts_with("mailto:") {
            parsed.mailto = Some(target.to_string());
        } else if lower.starts_with("http://") || lower.starts_with("https://") {
            parsed.http = Some(target.to_string());
        }
    }
    parsed
}

pub fn has_one_click_marker(headers: &Headers) -> bool {
    headers
        .get("List-Unsubscribe-Post")
        .map(|v| v.to_ascii_lowercase().contains(ONE_CLICK_MARKER))
        .unwrap_or(false)
}

pub fn detect_unsubscribe_method(headers: &Headers) -> UnsubscribeMethod {
    let has_list_id = headers.contains("List-Id");

    let Some(value) = headers.get("List-Unsubscribe") else {
        return UnsubscribeMethod::unknown(has_list_id);
    };

    let ListUnsubscribe { http, mailto } = parse_list_unsubscribe(value);

    let mechanism = match (http, mailto) {
        (Some(url), mailto) if has_one_click_marker(headers) => Mechanism::OneClick { url, mailto },
        (Some(url), mailto) => Mechanism::Http { url, mailto },
        (None, Some(mailto)) => Mechanism::Mailto { mailto },
        (None, None) => Mechanism::Unknown,
    };

    UnsubscribeMethod {
        mechanism,
        has_list_id,
    }
}
