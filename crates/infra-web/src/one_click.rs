use std::time::Duration;

use async_trait::async_trait;
use quietinbox_domain::OneClickTransport;
use quietinbox_error::InboxError;
use reqwest::header::CONTENT_TYPE;
use reqwest::{redirect, Client};
use tracing::{debug, info};

const ONE_CLICK_BODY: &str = "List-Unsubscribe=One-Click";
const USER_AGENT: &str = concat!("quietinbox/", env!("CARGO_PKG_VERSION"));

/// Posts RFC 8058 one-click requests. Redirects are returned, not followed.
pub struct HttpUnsubscriber {
    client: Client,
}

impl HttpUnsubscriber {
    pub fn new() -> Result<Self, InboxError> {
        Self::with_timeout(Duration::from_secs(15))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, InboxError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| InboxError::internal(format!("http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl OneClickTransport for HttpUnsubscriber {
    async fn post_one_click(&self, url: &str) -> Result<u16, InboxError> {
        debug!(url, "posting one-click unsubscribe");
        let resp = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(ONE_CLICK_BODY)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = resp.status().as_u16();
        info!(url, status, "one-click unsubscribe answered");
        Ok(status)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> InboxError {
    if e.is_timeout() || e.is_connect() {
        InboxError::network(e.to_string())
    } else if e.is_builder() {
        InboxError::invalid_input(e.to_string())
    } else {
        InboxError::api(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[tokio::test]
    async fn unparseable_url_is_invalid_input() {
        let transport = HttpUnsubscriber::new().unwrap();
        let err = transport.post_one_click("not a url").await.unwrap_err();
        assert!(matches!(err, InboxError::InvalidInput(_)));
    }
}
