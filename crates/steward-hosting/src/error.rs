//! Error types for the hosting boundary.

use thiserror::Error;

use steward_core::StewardError;

/// Errors raised while talking to the hosting platform.
#[derive(Debug, Error)]
pub enum HostingError {
    /// PR data could not be fetched after retries.
    #[error("data fetch failed for {what}: {detail}")]
    DataFetch { what: String, detail: String },

    /// A mutation was rejected.
    #[error("mutation {action} failed on #{pr}: {detail}")]
    Mutation {
        pr: u64,
        action: String,
        detail: String,
    },

    #[error("rate limited by hosting API (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("request timed out after {limit_ms}ms")]
    Timeout { limit_ms: u64 },

    /// Non-success HTTP status.
    #[error("HTTP {status} from {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    /// Transport-level failure.
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] StewardError),
}

impl HostingError {
    /// Whether a retry might succeed: rate limits, 5xx, timeouts and
    /// transport failures.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout { .. } | Self::Http(_) => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for HostingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            HostingError::Decode(err.to_string())
        } else {
            HostingError::Http(err.to_string())
        }
    }
}

/// Result alias for hosting operations.
pub type HostingResult<T> = std::result::Result<T, HostingError>;
