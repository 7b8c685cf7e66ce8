use thiserror::Error;

/// Failures reported by a [`RemoteBackend`](super::RemoteBackend).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// No backend URL is configured; writes stay queued until one is.
    #[error("remote backend not configured")]
    NotConfigured,

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl BackendError {
    /// True when retrying the same request can never succeed: client errors
    /// other than request timeout (408) and rate limiting (429).
    pub fn is_permanent(&self) -> bool {
        match self {
            BackendError::Status { status, .. } => {
                (400..500).contains(status) && *status != 408 && *status != 429
            }
            _ => false,
        }
    }

    /// True for responses worth retrying immediately inside the client.
    pub fn is_throttled(&self) -> bool {
        matches!(self, BackendError::Status { status: 429 | 503, .. })
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Timeout
        } else if e.is_decode() {
            BackendError::Decode(e.to_string())
        } else {
            BackendError::Network(e.to_string())
        }
    }
}
