use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use ps2filter_common::{
    attempt_deadline_for, server_wait_for, Config, GenerationError, ModelDescriptor,
    PredictionMode,
};

use super::{PredictionClient, PredictionJob};
use crate::prompt::ModelInput;

/// How long to keep polling one prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollBudget {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.poll_interval,
            max_attempts: config.poll_max_attempts,
        }
    }
}

/// Retry schedule for the blocking endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub attempt_timeout: Duration,
    pub base_delay: Duration,
    /// Status checks allowed for a prediction still running after its wait window.
    pub fallback_polls: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.retry_max_retries,
            attempt_timeout: config.retry_attempt_timeout,
            base_delay: config.retry_base_delay,
            fallback_polls: config.blocking_fallback_polls,
        }
    }

    /// Wait window requested from the provider, kept short of the deadline.
    pub fn server_wait(&self) -> Duration {
        server_wait_for(self.attempt_timeout)
    }

    /// Local deadline for one blocking attempt.
    pub fn attempt_deadline(&self) -> Duration {
        attempt_deadline_for(self.attempt_timeout)
    }

    /// Delay after the `failed`-th failed attempt (0-based): base × 2^failed.
    pub fn backoff(&self, failed: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(failed))
    }
}

/// Submits a prediction and drives it to a terminal state.
#[async_trait]
pub trait PredictionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn has_credentials(&self) -> bool;

    async fn submit(
        &self,
        model: &ModelDescriptor,
        input: &ModelInput,
    ) -> Result<PredictionJob, GenerationError>;

    async fn await_terminal(&self, job: PredictionJob) -> Result<PredictionJob, GenerationError>;
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

/// Submit, then poll the status URL on a fixed interval.
pub struct PollingStrategy {
    client: PredictionClient,
    budget: PollBudget,
}

impl PollingStrategy {
    pub fn new(client: PredictionClient, budget: PollBudget) -> Self {
        Self { client, budget }
    }
}

#[async_trait]
impl PredictionStrategy for PollingStrategy {
    fn name(&self) -> &'static str {
        "poll"
    }

    fn has_credentials(&self) -> bool {
        self.client.has_credentials()
    }

    async fn submit(
        &self,
        model: &ModelDescriptor,
        input: &ModelInput,
    ) -> Result<PredictionJob, GenerationError> {
        self.client.submit(model, input).await
    }

    async fn await_terminal(&self, job: PredictionJob) -> Result<PredictionJob, GenerationError> {
        self.client
            .run_until_terminal(job, self.budget.interval, self.budget.max_attempts)
            .await
    }
}

// ---------------------------------------------------------------------------
// Blocking
// ---------------------------------------------------------------------------

/// Block on the provider's wait endpoint with retries. A prediction still
/// running when the wait window closes is polled at the configured interval,
/// at most [`RetryPolicy::fallback_polls`] times.
pub struct BlockingStrategy {
    client: PredictionClient,
    retry: RetryPolicy,
    budget: PollBudget,
}

impl BlockingStrategy {
    pub fn new(client: PredictionClient, retry: RetryPolicy, budget: PollBudget) -> Self {
        Self {
            client,
            retry,
            budget,
        }
    }
}

#[async_trait]
impl PredictionStrategy for BlockingStrategy {
    fn name(&self) -> &'static str {
        "blocking"
    }

    fn has_credentials(&self) -> bool {
        self.client.has_credentials()
    }

    async fn submit(
        &self,
        model: &ModelDescriptor,
        input: &ModelInput,
    ) -> Result<PredictionJob, GenerationError> {
        self.client.run_with_retry(model, input, &self.retry).await
    }

    async fn await_terminal(&self, job: PredictionJob) -> Result<PredictionJob, GenerationError> {
        if job.state.is_terminal() {
            return Ok(job);
        }
        tracing::debug!(
            max_attempts = self.retry.fallback_polls,
            "Blocking call returned a running prediction, falling back to polling"
        );
        self.client
            .run_until_terminal(job, self.budget.interval, self.retry.fallback_polls)
            .await
    }
}

pub fn strategy_for(
    mode: PredictionMode,
    client: PredictionClient,
    budget: PollBudget,
    retry: RetryPolicy,
) -> Arc<dyn PredictionStrategy> {
    match mode {
        PredictionMode::Poll => Arc::new(PollingStrategy::new(client, budget)),
        PredictionMode::Blocking => Arc::new(BlockingStrategy::new(client, retry, budget)),
    }
}
