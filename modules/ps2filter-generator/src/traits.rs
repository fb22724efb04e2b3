// Trait seams for the generator's external dependencies.
//
// PredictionApi wraps the Replicate REST client; CounterStore wraps the
// rate-limit backing store. Both have mocks in `testing` so the orchestrator
// runs deterministically with no network.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use replicate_client::{Prediction, PredictionInput, ReplicateClient};
use upstash_client::UpstashClient;

// ---------------------------------------------------------------------------
// PredictionApi
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PredictionApi: Send + Sync {
    /// Whether a provider credential is configured at all.
    fn has_credentials(&self) -> bool;

    /// Start a prediction and return immediately.
    async fn create(
        &self,
        version: &str,
        input: &PredictionInput,
    ) -> replicate_client::Result<Prediction>;

    /// Start a prediction and block server-side for up to `wait`.
    async fn create_and_wait(
        &self,
        version: &str,
        input: &PredictionInput,
        wait: Duration,
    ) -> replicate_client::Result<Prediction>;

    /// Fetch a prediction's current state.
    async fn get(&self, poll_url: &str) -> replicate_client::Result<Prediction>;
}

#[async_trait]
impl PredictionApi for ReplicateClient {
    fn has_credentials(&self) -> bool {
        self.has_token()
    }

    async fn create(
        &self,
        version: &str,
        input: &PredictionInput,
    ) -> replicate_client::Result<Prediction> {
        self.create_prediction(version, input).await
    }

    async fn create_and_wait(
        &self,
        version: &str,
        input: &PredictionInput,
        wait: Duration,
    ) -> replicate_client::Result<Prediction> {
        let wait_secs = u32::try_from(wait.as_secs()).unwrap_or(u32::MAX);
        self.create_prediction_and_wait(version, input, wait_secs)
            .await
    }

    async fn get(&self, poll_url: &str) -> replicate_client::Result<Prediction> {
        self.get_prediction(poll_url).await
    }
}

// ---------------------------------------------------------------------------
// CounterStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key` and return the new count. A key created by
    /// this call expires after `ttl`.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64>;
}

#[async_trait]
impl CounterStore for UpstashClient {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64> {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        Ok(self.incr_with_ttl(key, ttl_ms).await?)
    }
}
