use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use url::Url;

use ps2filter_common::{GenerationError, GenerationRequest, StylePreset};
use ps2filter_generator::GeneratedImage;

use super::error::ApiError;
use super::identity::ClientAddr;
use super::apply_rate_limit_headers;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    #[serde(rename = "imageUrl")]
    image_url: String,
    prompt: Option<String>,
    style: Option<String>,
    preset: Option<StylePreset>,
    prompt_strength: Option<f64>,
    denoising_strength: Option<f64>,
    instant_id_strength: Option<f64>,
    negative_prompt: Option<String>,
}

impl GenerateBody {
    fn into_request(self) -> Result<GenerationRequest, GenerationError> {
        let source_image = Url::parse(self.image_url.trim()).map_err(|e| {
            GenerationError::InvalidRequest(format!("imageUrl is not a valid URL: {e}"))
        })?;

        let mut request = GenerationRequest::builder()
            .source_image(source_image)
            .user_prompt(self.prompt)
            .user_negative_prompt(self.negative_prompt)
            .preset(self.preset)
            .build();

        if let Some(style) = self.style.filter(|s| !s.trim().is_empty()) {
            request.style = style;
        }
        if let Some(v) = self.prompt_strength {
            request.prompt_strength = v;
        }
        if let Some(v) = self.denoising_strength {
            request.denoising_strength = v;
        }
        if let Some(v) = self.instant_id_strength {
            request.identity_strength = v;
        }

        Ok(request)
    }
}

/// Success body layout. `object` is canonical; the others serve older clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseShape {
    #[default]
    Object,
    List,
    Bare,
}

impl ResponseShape {
    fn render(self, image: &GeneratedImage) -> Response {
        let url = image.url.as_str();
        let body = match self {
            ResponseShape::Object => json!({ "result": url }),
            ResponseShape::List => json!({ "result": [url] }),
            ResponseShape::Bare => json!(url),
        };
        Json(body).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct GenerateQuery {
    #[serde(default)]
    shape: ResponseShape,
}

pub async fn api_generate(
    State(state): State<Arc<AppState>>,
    ClientAddr(identity): ClientAddr,
    query: Result<Query<GenerateQuery>, QueryRejection>,
    body: Result<Json<GenerateBody>, JsonRejection>,
) -> Response {
    let shape = match query {
        Ok(Query(q)) => q.shape,
        Err(rejection) => {
            return ApiError(GenerationError::InvalidRequest(rejection.body_text())).into_response()
        }
    };

    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            info!("Generate request body too large");
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(json!({ "error": "Request body too large", "details": rejection.body_text() })),
            )
                .into_response();
        }
        Err(rejection) => {
            return ApiError(GenerationError::InvalidRequest(rejection.body_text())).into_response()
        }
    };

    let request = match body.into_request() {
        Ok(request) => request,
        Err(e) => return ApiError(e).into_response(),
    };

    let outcome = state
        .orchestrator
        .generate(&request, identity.as_ref())
        .await;

    let mut response = match outcome.result {
        Ok(image) => shape.render(&image),
        Err(e) => ApiError(e).into_response(),
    };
    if let Some(decision) = &outcome.rate_limit {
        apply_rate_limit_headers(response.headers_mut(), decision);
    }
    response
}
