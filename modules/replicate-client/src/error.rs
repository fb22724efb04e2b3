use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReplicateError>;

#[derive(Debug, Error)]
pub enum ReplicateError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl ReplicateError {
    /// Transport failures, throttling and provider-side 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            ReplicateError::Network(_) => true,
            ReplicateError::Api { status, .. } => *status == 429 || *status >= 500,
            ReplicateError::Unauthorized(_) | ReplicateError::Parse(_) => false,
        }
    }
}

impl From<reqwest::Error> for ReplicateError {
    fn from(err: reqwest::Error) -> Self {
        ReplicateError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ReplicateError {
    fn from(err: serde_json::Error) -> Self {
        ReplicateError::Parse(err.to_string())
    }
}
