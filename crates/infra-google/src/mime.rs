use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use mailparse::{DispositionType, ParsedMail};
use quietinbox_error::InboxError;

/// Gmail's `raw` field is base64url, sometimes padded.
pub fn decode_raw(raw: &str) -> Result<Vec<u8>, InboxError> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .collect();
    URL_SAFE_NO_PAD
        .decode(cleaned)
        .map_err(|e| InboxError::api(format!("base64url decode: {e}")))
}

pub fn encode_raw(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// HTML and plain-text parts in document order, joined by newlines.
/// Attachments are skipped; a single-part message yields its body.
pub fn extract_body_text(message: &[u8]) -> Result<String, InboxError> {
    let parsed =
        mailparse::parse_mail(message).map_err(|e| InboxError::api(format!("mailparse: {e}")))?;

    let mut parts = Vec::new();
    collect_text_parts(&parsed, &mut parts);
    if parts.is_empty() {
        return Ok(parsed.get_body().unwrap_or_default());
    }
    Ok(parts.join("\n"))
}

fn collect_text_parts(part: &ParsedMail<'_>, out: &mut Vec<String>) {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            collect_text_parts(sub, out);
        }
        return;
    }

    if part.get_content_disposition().disposition == DispositionType::Attachment {
        return;
    }
    let mime = part.ctype.mimetype.to_ascii_lowercase();
    if mime == "text/html" || mime == "text/plain" {
        if let Ok(body) = part.get_body() {
            out.push(body);
        }
    }
}
