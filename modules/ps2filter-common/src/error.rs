use chrono::{DateTime, Utc};
use thiserror::Error;

/// Every way a generation call can end without an image.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("Server configuration error: {0}")]
    Configuration(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Rate limit exceeded: {remaining} of {limit} remaining")]
    RateLimited {
        limit: u32,
        remaining: u32,
        reset: DateTime<Utc>,
    },

    #[error("Provider rejected the API credentials")]
    Authentication,

    #[error("Provider rejected the prediction request (status {status})")]
    Submission { status: u16, body: String },

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("No subject detected: {0}")]
    NoSubjectDetected(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Prediction did not finish within {attempts} poll attempts")]
    Timeout { attempts: u32 },

    #[error("Prediction failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

impl GenerationError {
    /// Outcomes caused by the caller, not by us or the provider. Logged at info.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            GenerationError::RateLimited { .. }
                | GenerationError::NoSubjectDetected(_)
                | GenerationError::InvalidRequest(_)
        )
    }

    /// Short stable name for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::Configuration(_) => "configuration",
            GenerationError::UnknownModel(_) => "unknown_model",
            GenerationError::InvalidRequest(_) => "invalid_request",
            GenerationError::RateLimited { .. } => "rate_limited",
            GenerationError::Authentication => "authentication",
            GenerationError::Submission { .. } => "submission",
            GenerationError::MalformedResponse(_) => "malformed_response",
            GenerationError::ProviderUnavailable(_) => "provider_unavailable",
            GenerationError::NoSubjectDetected(_) => "no_subject_detected",
            GenerationError::GenerationFailed(_) => "generation_failed",
            GenerationError::Timeout { .. } => "timeout",
            GenerationError::RetriesExhausted { .. } => "retries_exhausted",
        }
    }
}
