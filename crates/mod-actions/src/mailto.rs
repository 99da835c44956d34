//! `mailto:` parsing and re-synthesis (RFC 6068).

use quietinbox_error::InboxError;

pub const DEFAULT_SUBJECT: &str = "Unsubscribe";
pub const DEFAULT_BODY: &str = "Please unsubscribe me from this mailing list.";

/// Decoded unsubscribe request. Missing subject and body get defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailtoRequest {
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Other header fields (cc, in-reply-to, ...) kept verbatim.
    pub extra: Vec<(String, String)>,
}

impl MailtoRequest {
    pub fn parse(uri: &str) -> Result<Self, InboxError> {
        let trimmed = uri.trim();
        let rest = trimmed
            .get(..7)
            .filter(|scheme| scheme.eq_ignore_ascii_case("mailto:"))
            .map(|_| &trimmed[7..])
            .ok_or_else(|| InboxError::invalid_input(format!("not a mailto uri: {uri}")))?;

        let (address, query) = rest.split_once('?').unwrap_or((rest, ""));
        let to = decode(address)?;
        if to.trim().is_empty() || !to.contains('@') {
            return Err(InboxError::invalid_input(format!("mailto without recipient: {uri}")));
        }

        let mut subject = None;
        let mut body = None;
        let mut extra = Vec::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key.to_ascii_lowercase().as_str() {
                "subject" => subject = Some(decode(value)?),
                "body" => body = Some(decode(value)?),
                _ => extra.push((key.to_string(), value.to_string())),
            }
        }

        Ok(Self {
            to,
            subject: subject
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),
            body: body
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_BODY.to_string()),
            extra,
        })
    }

    pub fn to_uri(&self) -> String {
        let mut uri = format!(
            "mailto:{}?subject={}&body={}",
            self.to,
            urlencoding::encode(&self.subject),
            urlencoding::encode(&self.body)
        );
        for (key, value) in &self.extra {
            uri.push('&');
            uri.push_str(key);
            uri.push('=');
            uri.push_str(value);
        }
        uri
    }
}

/// Canonical mailto URI with subject and body always present.
pub fn build_mailto_uri(uri: &str) -> Result<String, InboxError> {
    MailtoRequest::parse(uri).map(|r| r.to_uri())
}

fn decode(value: &str) -> Result<String, InboxError> {
    urlencoding::decode(value)
        .map(|s| s.into_owned())
        .map_err(|e| InboxError::invalid_input(format!("bad percent-encoding in mailto: {e}")))
}
