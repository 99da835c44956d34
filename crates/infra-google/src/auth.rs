use async_trait::async_trait;
use quietinbox_domain::CredentialProvider;
use quietinbox_error::InboxError;

pub const TOKEN_ENV: &str = "GMAIL_ACCESS_TOKEN";

/// Bearer token handed in from outside; refresh is the caller's business.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn from_env() -> Result<Self, InboxError> {
        match std::env::var(TOKEN_ENV) {
            Ok(token) if !token.trim().is_empty() => Ok(Self::new(token.trim())),
            _ => Err(InboxError::auth(format!("{TOKEN_ENV} is not set"))),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String, InboxError> {
        Ok(self.token.clone())
    }
}
