use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InboxError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("api error: {0}")]
    Api(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("a scan is already running")]
    ScanInProgress,

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl InboxError {
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    pub fn api(msg: impl Into<String>) -> Self {
        Self::Api(msg.into())
    }

    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Quota, server and transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Network(_))
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<&'static str>,
    pub retryable: bool,
}

impl From<&InboxError> for ErrorResponse {
    fn from(err: &InboxError) -> Self {
        let (code, suggestion) = match err {
            InboxError::Auth(_) => (
                "AUTH_ERROR",
                Some("Refresh the access token in GMAIL_ACCESS_TOKEN and restart"),
            ),
            InboxError::Api(_) => ("API_ERROR", None),
            InboxError::RateLimited(_) => (
                "RATE_LIMITED",
                Some("Gmail quota exhausted. Wait a minute and try again"),
            ),
            InboxError::Network(_) => (
                "NETWORK_ERROR",
                Some("Check internet connection and try again"),
            ),
            InboxError::NotFound(_) => (
                "NOT_FOUND",
                Some("Use list_groups to find valid group ids"),
            ),
            InboxError::InvalidInput(_) => ("INVALID_INPUT", None),
            InboxError::Storage(_) => (
                "STORAGE_ERROR",
                Some("Check that QUIETINBOX_DATA_DIR is writable"),
            ),
            InboxError::ScanInProgress => (
                "SCAN_IN_PROGRESS",
                Some("Wait for the running scan to finish or call cancel_scan"),
            ),
            InboxError::Cancelled => ("CANCELLED", Some("Run scan_mailbox again to resume")),
            InboxError::Internal(_) => ("INTERNAL_ERROR", Some("Unexpected error")),
        };
        Self {
            code,
            message: err.to_string(),
            suggestion,
            retryable: err.is_retryable(),
        }
    }
}

impl ErrorResponse {
    pub fn to_compact(&self) -> String {
        let mut parts = vec![format!("[{}] {}", self.code, self.message)];
        if let Some(s) = self.suggestion {
            parts.push(format!("Suggestion: {s}"));
        }
        if self.retryable {
            parts.push("(retryable)".to_string());
        }
        parts.join(" | ")
    }
}
