use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde_json::json;

use ps2filter_common::GenerationError;

/// HTTP rendering of a [`GenerationError`]: `{error, details?}` with a
/// status per failure class.
#[derive(Debug)]
pub struct ApiError(pub GenerationError);

impl From<GenerationError> for ApiError {
    fn from(err: GenerationError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            GenerationError::InvalidRequest(_) | GenerationError::NoSubjectDetected(_) => {
                StatusCode::BAD_REQUEST
            }
            GenerationError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GenerationError::Authentication => StatusCode::UNAUTHORIZED,
            GenerationError::Submission { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            GenerationError::ProviderUnavailable(_) | GenerationError::RetriesExhausted { .. } => {
                StatusCode::BAD_GATEWAY
            }
            GenerationError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GenerationError::Configuration(_)
            | GenerationError::UnknownModel(_)
            | GenerationError::MalformedResponse(_)
            | GenerationError::GenerationFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// User-facing message and optional detail.
    fn message(&self) -> (String, Option<String>) {
        match &self.0 {
            GenerationError::Configuration(_) => (self.0.to_string(), None),
            GenerationError::UnknownModel(name) => (
                format!("Invalid model configuration for model: {name}"),
                None,
            ),
            GenerationError::InvalidRequest(detail) => {
                ("Invalid request".to_string(), Some(detail.clone()))
            }
            GenerationError::RateLimited { .. } => (
                "Too many uploads in 1 day. Please try again after 24 hours.".to_string(),
                None,
            ),
            GenerationError::Authentication => (
                "Authentication failed. Please check your API key.".to_string(),
                None,
            ),
            GenerationError::Submission { status, body } => (
                format!("API request failed with status {status}"),
                Some(body.clone()),
            ),
            GenerationError::MalformedResponse(detail) => (
                "Invalid response from the image generation service".to_string(),
                Some(detail.clone()),
            ),
            GenerationError::ProviderUnavailable(detail) => (
                "Image generation service is unavailable. Please try again later.".to_string(),
                Some(detail.clone()),
            ),
            GenerationError::NoSubjectDetected(_) => (
                "No face detected in the uploaded image. Please try a different image with a clear face."
                    .to_string(),
                None,
            ),
            GenerationError::GenerationFailed(detail) => {
                ("Image generation failed".to_string(), Some(detail.clone()))
            }
            GenerationError::Timeout { .. } => (
                "Image generation timed out. Please try again later.".to_string(),
                None,
            ),
            GenerationError::RetriesExhausted { attempts, last } => (
                format!("Image generation failed after {attempts} attempts. Please try again later."),
                Some(last.clone()),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error, details) = self.message();

        let body = match details {
            Some(details) => json!({ "error": error, "details": details }),
            None => json!({ "error": error }),
        };
        let mut response = (status, Json(body)).into_response();

        if let GenerationError::RateLimited { reset, .. } = &self.0 {
            let wait_ms = (*reset - Utc::now()).num_milliseconds().max(0);
            let retry_after = (wait_ms as u64).div_ceil(1000).max(1);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        }

        response
    }
}
