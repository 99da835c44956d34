use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox as Address, SinglePart};
use quietinbox_domain::{
    CredentialProvider, FilterAction, FilterCriteria, Headers, Mailbox, MessagePage, MessageSource,
    MutationOp, RawMessage, MAX_MUTATION_BATCH,
};
use quietinbox_error::InboxError;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::mime::{decode_raw, encode_raw, extract_body_text};

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_secs(1);

pub struct GmailAdapter {
    client: Client,
    credentials: Arc<dyn CredentialProvider>,
    base_url: String,
    own_address: OnceCell<String>,
}

impl GmailAdapter {
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Result<Self, InboxError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| InboxError::internal(format!("http client: {e}")))?;
        Ok(Self {
            client,
            credentials,
            base_url: GMAIL_API_BASE.to_string(),
            own_address: OnceCell::new(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    /// Sends with bearer auth, retrying quota, 5xx and transport failures
    /// with exponential backoff.
    async fn execute<F>(&self, what: &str, build: F) -> Result<Response, InboxError>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let mut delay = BASE_BACKOFF;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let token = self.credentials.access_token().await?;
            let outcome = match build(&self.client).bearer_auth(&token).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => {
                    let status = resp.status();
                    let retry_after = resp
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .map(Duration::from_secs);
                    let body = resp.text().await.unwrap_or_default();
                    (map_status(status, &body), retry_after)
                }
                Err(e) => (map_transport_error(&e), None),
            };

            let (err, retry_after) = outcome;
            if !err.is_retryable() || attempt >= MAX_ATTEMPTS {
                return Err(err);
            }
            let wait = retry_after.unwrap_or(delay);
            warn!(what, attempt, error = %err, wait_ms = wait.as_millis() as u64, "gmail request failed, retrying");
            tokio::time::sleep(wait).await;
            delay = (delay * 2).min(Duration::from_secs(30));
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        what: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, InboxError> {
        let url = self.url(path);
        let resp = self
            .execute(what, |client| client.get(&url).query(query))
            .await?;
        resp.json::<T>()
            .await
            .map_err(|e| InboxError::api(format!("{what}: decode response: {e}")))
    }

    async fn post_json(&self, what: &str, path: &str, body: &serde_json::Value) -> Result<Response, InboxError> {
        let url = self.url(path);
        self.execute(what, |client| client.post(&url).json(body)).await
    }

    async fn own_address(&self) -> Result<&str, InboxError> {
        self.own_address
            .get_or_try_init(|| async {
                let profile: ProfileResponse = self.get_json("profile", "profile", &[]).await?;
                Ok::<_, InboxError>(profile.email_address)
            })
            .await
            .map(String::as_str)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    messages: Vec<IdRef>,
    next_page_token: Option<String>,
    #[serde(default)]
    result_size_estimate: u64,
}

#[derive(Debug, Deserialize)]
struct IdRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataResponse {
    id: String,
    #[serde(default)]
    label_ids: Vec<String>,
    snippet: Option<String>,
    payload: Option<Payload>,
}

#[derive(Debug, Default, Deserialize)]
struct Payload {
    #[serde(default)]
    headers: Vec<HeaderEntry>,
}

#[derive(Debug, Deserialize)]
struct HeaderEntry {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    raw: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileResponse {
    email_address: String,
}

impl From<ListResponse> for MessagePage {
    fn from(list: ListResponse) -> Self {
        MessagePage {
            ids: list.messages.into_iter().map(|m| m.id).collect(),
            next_page_token: list.next_page_token.filter(|t| !t.is_empty()),
            approx_total: list.result_size_estimate,
        }
    }
}

impl From<MetadataResponse> for RawMessage {
    fn from(msg: MetadataResponse) -> Self {
        let headers: Headers = msg
            .payload
            .unwrap_or_default()
            .headers
            .into_iter()
            .map(|h| (h.name, h.value))
            .collect();
        RawMessage {
            id: msg.id,
            headers,
            labels: msg.label_ids,
            snippet: msg.snippet,
        }
    }
}

fn map_status(status: StatusCode, body: &str) -> InboxError {
    let detail = format!("{status}: {}", truncate_body(body));
    match status {
        StatusCode::UNAUTHORIZED => InboxError::auth(detail),
        StatusCode::TOO_MANY_REQUESTS => InboxError::rate_limited(detail),
        StatusCode::FORBIDDEN if body.contains("rateLimitExceeded") || body.contains("quota") => {
            InboxError::rate_limited(detail)
        }
        StatusCode::FORBIDDEN => InboxError::auth(detail),
        StatusCode::NOT_FOUND => InboxError::not_found(detail),
        StatusCode::BAD_REQUEST => InboxError::invalid_input(detail),
        s if s.is_server_error() => InboxError::network(detail),
        _ => InboxError::api(detail),
    }
}

fn map_transport_error(e: &reqwest::Error) -> InboxError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        InboxError::network(e.to_string())
    } else {
        InboxError::api(e.to_string())
    }
}

fn truncate_body(body: &str) -> String {
    let oneline = body.replace(['\n', '\r'], " ");
    if oneline.chars().count() > 200 {
        let cut: String = oneline.chars().take(200).collect();
        format!("{cut}...")
    } else {
        oneline
    }
}

fn modify_body(ids: &[String], op: MutationOp) -> serde_json::Value {
    match op {
        MutationOp::Archive => json!({ "ids": ids, "removeLabelIds": ["INBOX"] }),
        MutationOp::Trash => json!({ "ids": ids, "addLabelIds": ["TRASH"], "removeLabelIds": ["INBOX"] }),
    }
}

#[async_trait]
impl MessageSource for GmailAdapter {
    async fn list_messages(
        &self,
        query: &str,
        page_size: usize,
        page_token: Option<&str>,
    ) -> Result<MessagePage, InboxError> {
        let mut params = vec![("q", query.to_string()), ("maxResults", page_size.to_string())];
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        let list: ListResponse = self.get_json("list messages", "messages", &params).await?;
        let page = MessagePage::from(list);
        debug!(query, count = page.ids.len(), has_more = page.next_page_token.is_some(), "listed messages");
        Ok(page)
    }

    async fn get_message_metadata(
        &self,
        id: &str,
        header_names: &[&str],
    ) -> Result<RawMessage, InboxError> {
        let mut params = vec![("format", "metadata".to_string())];
        params.extend(header_names.iter().map(|h| ("metadataHeaders", h.to_string())));
        let msg: MetadataResponse = self
            .get_json("get metadata", &format!("messages/{id}"), &params)
            .await?;
        Ok(msg.into())
    }

    async fn get_message_body(&self, id: &str) -> Result<String, InboxError> {
        let msg: RawResponse = self
            .get_json("get body", &format!("messages/{id}"), &[("format", "raw".to_string())])
            .await?;
        let bytes = decode_raw(&msg.raw)?;
        extract_body_text(&bytes)
    }
}

#[async_trait]
impl Mailbox for GmailAdapter {
    async fn mutate_messages(&self, ids: &[String], op: MutationOp) -> Result<(), InboxError> {
        if ids.is_empty() {
            return Ok(());
        }
        if ids.len() > MAX_MUTATION_BATCH {
            return Err(InboxError::invalid_input(format!(
                "batch of {} exceeds {MAX_MUTATION_BATCH} ids",
                ids.len()
            )));
        }
        self.post_json("batch modify", "messages/batchModify", &modify_body(ids, op))
            .await?;
        info!(count = ids.len(), op = ?op, "modified messages");
        Ok(())
    }

    async fn create_filter(
        &self,
        criteria: &FilterCriteria,
        action: &FilterAction,
    ) -> Result<(), InboxError> {
        let body = json!({ "criteria": criteria, "action": action });
        self.post_json("create filter", "settings/filters", &body).await?;
        info!(from = ?criteria.from, "created filter");
        Ok(())
    }

    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), InboxError> {
        let from: Address = self
            .own_address()
            .await?
            .parse()
            .map_err(|e| InboxError::internal(format!("invalid from: {e}")))?;
        let to_mailbox: Address = to
            .parse()
            .map_err(|e| InboxError::invalid_input(format!("invalid to '{to}': {e}")))?;

        let email = lettre::Message::builder()
            .from(from)
            .to(to_mailbox)
            .subject(subject)
            .singlepart(
                SinglePart::builder()
                    .content_type(ContentType::TEXT_PLAIN)
                    .body(body.to_string()),
            )
            .map_err(|e| InboxError::internal(format!("email build: {e}")))?;

        let payload = json!({ "raw": encode_raw(&email.formatted()) });
        self.post_json("send", "messages/send", &payload).await?;
        info!(to, subject, "email sent");
        Ok(())
    }
}
