pub mod error;
pub mod types;

use std::time::Duration;

pub use error::{ReplicateError, Result};
pub use types::{CreatePrediction, Prediction, PredictionInput, PredictionStatus, PredictionUrls};

const BASE_URL: &str = "https://api.replicate.com/v1";

/// Upper bound Replicate accepts for `Prefer: wait=N`.
pub const MAX_WAIT_SECS: u32 = 60;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ReplicateClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
    timeout: Duration,
}

impl ReplicateClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: http_client(DEFAULT_TIMEOUT),
            token: token.into(),
            base_url: BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Per-request timeout. A blocking create gets its wait window on top.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self.timeout = timeout;
        self
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn has_token(&self) -> bool {
        !self.token.trim().is_empty()
    }

    /// Start a prediction. Returns immediately with status `starting` and a poll URL.
    pub async fn create_prediction(
        &self,
        version: &str,
        input: &PredictionInput,
    ) -> Result<Prediction> {
        let url = format!("{}/predictions", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&CreatePrediction { version, input })
            .send()
            .await?;

        read_prediction(resp).await
    }

    /// Start a prediction and hold the connection open until it finishes or
    /// `wait_secs` elapses. A prediction still running at that point comes
    /// back non-terminal with its poll URL.
    pub async fn create_prediction_and_wait(
        &self,
        version: &str,
        input: &PredictionInput,
        wait_secs: u32,
    ) -> Result<Prediction> {
        let url = format!("{}/predictions", self.base_url);
        let wait = wait_secs.clamp(1, MAX_WAIT_SECS);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header("Prefer", format!("wait={wait}"))
            .timeout(Duration::from_secs(u64::from(wait)) + self.timeout)
            .json(&CreatePrediction { version, input })
            .send()
            .await?;

        read_prediction(resp).await
    }

    /// Fetch the current state of a prediction from its poll URL.
    pub async fn get_prediction(&self, poll_url: &str) -> Result<Prediction> {
        let resp = self
            .client
            .get(poll_url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        read_prediction(resp).await
    }
}

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

async fn read_prediction(resp: reqwest::Response) -> Result<Prediction> {
    let status = resp.status();
    let body = resp.text().await?;

    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(ReplicateError::Unauthorized(body));
    }
    if !status.is_success() {
        return Err(ReplicateError::Api {
            status: status.as_u16(),
            message: body,
        });
    }

    let prediction: Prediction = serde_json::from_str(&body)?;
    tracing::debug!(
        prediction_id = prediction.id.as_deref().unwrap_or("-"),
        status = ?prediction.status,
        "Replicate prediction response"
    );
    Ok(prediction)
}
