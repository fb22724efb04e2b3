use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{error, info, warn};
use typed_builder::TypedBuilder;
use url::Url;

use ps2filter_common::{
    ClientIdentity, GenerationError, GenerationRequest, ModelRegistry, RateLimitDecision,
    DEFAULT_MODEL,
};

use crate::prediction::strategy::PredictionStrategy;
use crate::prediction::PredictionJob;
use crate::prompt::build_model_input;
use crate::ratelimit::RateLimiter;

/// A finished generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub url: Url,
    pub prediction_id: Option<String>,
}

/// Result of one `generate` call. The rate-limit decision travels with
/// the result so the caller can report it on success and failure alike.
#[derive(Debug)]
pub struct GenerationOutcome {
    pub rate_limit: Option<RateLimitDecision>,
    pub result: Result<GeneratedImage, GenerationError>,
}

/// Validates, rate-limits, builds input, submits and waits for one image.
/// Built once at startup and shared across requests.
#[derive(TypedBuilder)]
pub struct GenerationOrchestrator {
    #[builder(default = ModelRegistry::builtin())]
    registry: ModelRegistry,
    #[builder(default = DEFAULT_MODEL.to_string(), setter(into))]
    model_name: String,
    #[builder(default = RateLimiter::disabled())]
    limiter: RateLimiter,
    predictions: Arc<dyn PredictionStrategy>,
}

impl GenerationOrchestrator {
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn strategy_name(&self) -> &'static str {
        self.predictions.name()
    }

    pub async fn generate(
        &self,
        request: &GenerationRequest,
        identity: Option<&ClientIdentity>,
    ) -> GenerationOutcome {
        let started = Instant::now();
        let mut rate_limit = None;
        let result = self.run(request, identity, &mut rate_limit).await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let version = self
            .registry
            .get(&self.model_name)
            .map(|m| m.version.as_str())
            .unwrap_or("-");

        match &result {
            Ok(image) => info!(
                model = %self.model_name,
                prediction_id = image.prediction_id.as_deref().unwrap_or("-"),
                elapsed_ms,
                "Image generated"
            ),
            Err(e) if e.is_expected() => info!(
                model = %self.model_name,
                kind = e.kind(),
                error = %e,
                "Generation declined"
            ),
            Err(e @ (GenerationError::Configuration(_) | GenerationError::Authentication)) => {
                error!(
                    model = %self.model_name,
                    version,
                    kind = e.kind(),
                    error = %e,
                    "Generation failed"
                )
            }
            Err(e) => warn!(
                model = %self.model_name,
                version,
                kind = e.kind(),
                attempts = attempts(e),
                elapsed_ms,
                error = %e,
                "Generation failed"
            ),
        }

        GenerationOutcome { rate_limit, result }
    }

    async fn run(
        &self,
        request: &GenerationRequest,
        identity: Option<&ClientIdentity>,
        rate_limit: &mut Option<RateLimitDecision>,
    ) -> Result<GeneratedImage, GenerationError> {
        if !self.predictions.has_credentials() {
            return Err(GenerationError::Configuration("API key is missing".to_string()));
        }
        let model = self.registry.get(&self.model_name)?;
        request.validate()?;

        *rate_limit = self.limiter.check_and_consume(identity).await;
        if let Some(denied) = rate_limit.as_ref().filter(|d| !d.allowed) {
            return Err(GenerationError::RateLimited {
                limit: denied.limit,
                remaining: denied.remaining,
                reset: denied.reset,
            });
        }

        let input = build_model_input(model, request);
        let job = self.predictions.submit(model, &input).await?;
        let job = self.predictions.await_terminal(job).await?;
        extract_image(job)
    }
}

fn attempts(err: &GenerationError) -> Option<u32> {
    match err {
        GenerationError::Timeout { attempts } => Some(*attempts),
        GenerationError::RetriesExhausted { attempts, .. } => Some(*attempts),
        _ => None,
    }
}

/// First URI of the prediction output, which must be an absolute URL.
fn extract_image(job: PredictionJob) -> Result<GeneratedImage, GenerationError> {
    let raw = match job.output {
        Some(Value::String(s)) => s,
        Some(Value::Array(items)) => match items.into_iter().next() {
            Some(Value::String(s)) => s,
            other => {
                return Err(GenerationError::MalformedResponse(format!(
                    "unexpected output element: {other:?}"
                )))
            }
        },
        other => {
            return Err(GenerationError::MalformedResponse(format!(
                "unexpected prediction output: {other:?}"
            )))
        }
    };

    let url = Url::parse(raw.trim()).map_err(|e| {
        GenerationError::MalformedResponse(format!("Generated image URL is invalid: {raw} ({e})"))
    })?;

    Ok(GeneratedImage {
        url,
        prediction_id: job.id,
    })
}
