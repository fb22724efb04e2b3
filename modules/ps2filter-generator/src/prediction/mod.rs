//! Drives one prediction from submission to a terminal state.
//!
//! Every successful return from this module carries a job that is either
//! still running or succeeded; provider-side failures come back as
//! [`GenerationError`] already classified.

pub mod strategy;

use std::sync::Arc;
use std::time::Duration;

use replicate_client::{Prediction, PredictionStatus, ReplicateError};
use serde_json::Value;
use tracing::{debug, info, warn};

use ps2filter_common::{GenerationError, ModelDescriptor};

use crate::prompt::ModelInput;
use crate::traits::PredictionApi;
use strategy::RetryPolicy;

/// Provider messages that mean the model found nothing to transform.
const NO_SUBJECT_PATTERNS: &[&str] = &[
    "no face detected",
    "no faces detected",
    "face not detected",
    "no subject detected",
];

const UNKNOWN_FAILURE: &str = "Unknown error occurred";

/// Bound on a single submit or status call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// PredictionJob
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Starting,
    Processing,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    /// Map a provider status onto the job lifecycle. Statuses we do not
    /// recognise leave the job where it was.
    fn advance(self, status: PredictionStatus) -> Self {
        match status {
            PredictionStatus::Starting => JobState::Starting,
            PredictionStatus::Processing => JobState::Processing,
            PredictionStatus::Succeeded => JobState::Succeeded,
            PredictionStatus::Failed | PredictionStatus::Canceled => JobState::Failed,
            PredictionStatus::Unknown => self,
        }
    }
}

/// One in-flight prediction as last reported by the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionJob {
    pub id: Option<String>,
    pub poll_url: Option<String>,
    pub state: JobState,
    /// A single URI or a list of URIs once succeeded.
    pub output: Option<Value>,
    pub error_detail: Option<String>,
}

impl PredictionJob {
    fn from_prediction(prediction: Prediction) -> Self {
        Self {
            state: JobState::Starting.advance(prediction.status),
            poll_url: prediction.poll_url().map(str::to_string),
            error_detail: prediction.error_message(),
            id: prediction.id,
            output: prediction.output,
        }
    }

    fn updated(&self, prediction: Prediction) -> Self {
        Self {
            state: self.state.advance(prediction.status),
            poll_url: prediction
                .poll_url()
                .map(str::to_string)
                .or_else(|| self.poll_url.clone()),
            error_detail: prediction.error_message(),
            id: prediction.id.or_else(|| self.id.clone()),
            output: prediction.output,
        }
    }

    /// Turn a failed job into its classified error.
    fn settle(self) -> Result<Self, GenerationError> {
        match self.state {
            JobState::Failed => Err(classify_failure(self.error_detail.as_deref())),
            _ => Ok(self),
        }
    }

    fn require_poll_url(self) -> Result<Self, GenerationError> {
        if self.state.is_terminal() || self.poll_url.is_some() {
            Ok(self)
        } else {
            Err(GenerationError::MalformedResponse(
                "prediction response has no status URL".to_string(),
            ))
        }
    }
}

/// Sort a provider failure message into "nothing to transform" or a plain failure.
pub fn classify_failure(detail: Option<&str>) -> GenerationError {
    let message = detail
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(UNKNOWN_FAILURE)
        .to_string();

    let lowered = message.to_lowercase();
    if NO_SUBJECT_PATTERNS.iter().any(|p| lowered.contains(p)) {
        GenerationError::NoSubjectDetected(message)
    } else {
        GenerationError::GenerationFailed(message)
    }
}

// ---------------------------------------------------------------------------
// PredictionClient
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PredictionClient {
    api: Arc<dyn PredictionApi>,
    request_timeout: Duration,
}

impl PredictionClient {
    pub fn new(api: Arc<dyn PredictionApi>) -> Self {
        Self {
            api,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn has_credentials(&self) -> bool {
        self.api.has_credentials()
    }

    /// Start a prediction and return as soon as the provider accepts it.
    pub async fn submit(
        &self,
        model: &ModelDescriptor,
        input: &ModelInput,
    ) -> Result<PredictionJob, GenerationError> {
        let prediction = tokio::time::timeout(
            self.request_timeout,
            self.api.create(&model.version, input),
        )
        .await
        .map_err(|_| self.call_timed_out("submission"))?
        .map_err(submit_error)?;

        let job = PredictionJob::from_prediction(prediction).require_poll_url()?;
        info!(
            model = %model.name,
            prediction_id = job.id.as_deref().unwrap_or("-"),
            "Prediction submitted"
        );
        job.settle()
    }

    /// One status check against the job's poll URL.
    pub async fn poll(&self, job: &PredictionJob) -> Result<PredictionJob, GenerationError> {
        let poll_url = job.poll_url.as_deref().ok_or_else(|| {
            GenerationError::MalformedResponse("prediction has no status URL".to_string())
        })?;

        let prediction = tokio::time::timeout(self.request_timeout, self.api.get(poll_url))
            .await
            .map_err(|_| self.call_timed_out("status check"))?
            .map_err(poll_error)?;
        job.updated(prediction).settle()
    }

    fn call_timed_out(&self, call: &str) -> GenerationError {
        GenerationError::ProviderUnavailable(format!(
            "{call} timed out after {}ms",
            self.request_timeout.as_millis()
        ))
    }

    /// Poll until the job succeeds or fails, at most `max_attempts` times.
    ///
    /// Sleeps `interval` between polls, never after a terminal state or the
    /// final attempt. Transient status-check failures use up an attempt
    /// without ending the loop.
    pub async fn run_until_terminal(
        &self,
        job: PredictionJob,
        interval: Duration,
        max_attempts: u32,
    ) -> Result<PredictionJob, GenerationError> {
        if job.state.is_terminal() {
            return job.settle();
        }

        let mut current = job;
        for attempt in 1..=max_attempts {
            match self.poll(&current).await {
                Ok(next) if next.state.is_terminal() => return Ok(next),
                Ok(next) => {
                    debug!(attempt, max_attempts, state = ?next.state, "Prediction still running");
                    current = next;
                }
                Err(GenerationError::ProviderUnavailable(reason)) => {
                    warn!(attempt, max_attempts, reason = %reason, "Status check failed");
                }
                Err(e) => return Err(e),
            }

            if attempt < max_attempts {
                tokio::time::sleep(interval).await;
            }
        }

        Err(GenerationError::Timeout {
            attempts: max_attempts,
        })
    }

    /// Submit through the provider's blocking endpoint, retrying with
    /// exponential backoff. The returned job may still be running when the
    /// provider's wait window closed first.
    ///
    /// The provider is asked to wait [`RetryPolicy::server_wait`], which ends
    /// before [`RetryPolicy::attempt_deadline`].
    pub async fn run_with_retry(
        &self,
        model: &ModelDescriptor,
        input: &ModelInput,
        policy: &RetryPolicy,
    ) -> Result<PredictionJob, GenerationError> {
        let attempts = policy.max_retries.saturating_add(1);
        let server_wait = policy.server_wait();
        let deadline = policy.attempt_deadline();
        let mut last = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(policy.backoff(attempt - 1)).await;
            }

            let call = self
                .api
                .create_and_wait(&model.version, input, server_wait);

            let err = match tokio::time::timeout(deadline, call).await {
                Ok(Ok(prediction)) => {
                    match PredictionJob::from_prediction(prediction)
                        .require_poll_url()
                        .and_then(PredictionJob::settle)
                    {
                        Ok(job) => {
                            info!(
                                model = %model.name,
                                prediction_id = job.id.as_deref().unwrap_or("-"),
                                attempt = attempt + 1,
                                state = ?job.state,
                                "Blocking prediction returned"
                            );
                            return Ok(job);
                        }
                        Err(e) => e,
                    }
                }
                Ok(Err(e)) => submit_error(e),
                Err(_) => GenerationError::ProviderUnavailable(format!(
                    "attempt timed out after {}ms",
                    deadline.as_millis()
                )),
            };

            if !is_retryable(&err) {
                return Err(err);
            }

            warn!(
                model = %model.name,
                version = %model.version,
                attempt = attempt + 1,
                attempts,
                error = %err,
                "Prediction attempt failed"
            );
            last = err.to_string();
        }

        Err(GenerationError::RetriesExhausted { attempts, last })
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn submit_error(err: ReplicateError) -> GenerationError {
    match err {
        ReplicateError::Unauthorized(_) => GenerationError::Authentication,
        ReplicateError::Api { status, message } => GenerationError::Submission {
            status,
            body: message,
        },
        ReplicateError::Parse(m) => GenerationError::MalformedResponse(m),
        ReplicateError::Network(m) => GenerationError::ProviderUnavailable(m),
    }
}

fn poll_error(err: ReplicateError) -> GenerationError {
    if err.is_transient() {
        return GenerationError::ProviderUnavailable(err.to_string());
    }
    match err {
        ReplicateError::Unauthorized(_) => GenerationError::Authentication,
        ReplicateError::Parse(m) => GenerationError::MalformedResponse(m),
        other => GenerationError::GenerationFailed(other.to_string()),
    }
}

fn is_retryable(err: &GenerationError) -> bool {
    match err {
        GenerationError::Authentication | GenerationError::NoSubjectDetected(_) => false,
        GenerationError::Submission { status, .. } => *status == 429 || *status >= 500,
        _ => true,
    }
}
