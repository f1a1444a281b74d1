//! Fetch pipeline error types.

use super::url::UrlError;

/// Errors from the HTTP fetch pipeline.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("INVALID_URL: {0}")]
    InvalidUrl(#[from] UrlError),

    /// robots.txt forbids the configured user agent from fetching the URL.
    #[error("ROBOTS_DISALLOWED: {url}")]
    RobotsDisallowed { url: String },

    #[error("FETCH_TIMEOUT: {0}")]
    Timeout(String),

    /// Connection could not be established or was reset.
    #[error("NETWORK_ERROR: {0}")]
    Network(String),

    /// Non-success HTTP status.
    #[error("HTTP_ERROR: status {status} for {url}")]
    Http { status: u16, url: String },

    #[error("FETCH_TOO_LARGE: {size} bytes exceeds {limit}")]
    TooLarge { size: u64, limit: usize },

    /// Body could not be decoded as expected.
    #[error("PARSE_ERROR: {0}")]
    Parse(String),

    #[error("CLIENT_ERROR: {0}")]
    Client(String),
}

impl FetchError {
    /// Timeouts, connection failures, 5xx and 429 are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout(_) | FetchError::Network(_) => true,
            FetchError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// HTTP status, when the failure carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Stable name of the failure class, recorded in run error details.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::InvalidUrl(_) => "invalid_url",
            FetchError::RobotsDisallowed { .. } => "robots_disallowed",
            FetchError::Timeout(_) => "timeout",
            FetchError::Network(_) => "network",
            FetchError::Http { .. } => "http",
            FetchError::TooLarge { .. } => "too_large",
            FetchError::Parse(_) => "parse",
            FetchError::Client(_) => "client",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() || err.is_body() {
            FetchError::Network(err.to_string())
        } else if err.is_decode() {
            FetchError::Parse(err.to_string())
        } else if let Some(status) = err.status() {
            FetchError::Http {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            }
        } else {
            FetchError::Client(err.to_string())
        }
    }
}
