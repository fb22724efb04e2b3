// Test mocks for the generator.
//
// Two mocks matching the two trait boundaries:
// - MockPredictionApi (PredictionApi): scripted create / wait / poll responses
// - MockCounterStore (CounterStore): fixed count or a failing store
//
// Plus helpers for building provider predictions in each lifecycle state.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use replicate_client::{Prediction, PredictionInput, ReplicateError};
use serde_json::{json, Value};

use crate::traits::{CounterStore, PredictionApi};

// ---------------------------------------------------------------------------
// Prediction helpers
// ---------------------------------------------------------------------------

pub const TEST_PREDICTION_ID: &str = "p-test-1";

fn prediction(value: Value) -> Prediction {
    serde_json::from_value(value).expect("test prediction is valid JSON")
}

/// Freshly created prediction with a status URL.
pub fn started(poll_url: &str) -> Prediction {
    prediction(json!({
        "id": TEST_PREDICTION_ID,
        "status": "starting",
        "urls": { "get": poll_url },
    }))
}

pub fn processing() -> Prediction {
    prediction(json!({ "id": TEST_PREDICTION_ID, "status": "processing" }))
}

pub fn succeeded(output: Value) -> Prediction {
    prediction(json!({
        "id": TEST_PREDICTION_ID,
        "status": "succeeded",
        "output": output,
    }))
}

pub fn failed(message: &str) -> Prediction {
    prediction(json!({
        "id": TEST_PREDICTION_ID,
        "status": "failed",
        "error": message,
    }))
}

pub fn unauthorized() -> ReplicateError {
    ReplicateError::Unauthorized(r#"{"detail":"Invalid token."}"#.to_string())
}

// ---------------------------------------------------------------------------
// MockPredictionApi
// ---------------------------------------------------------------------------

/// One queued response and how long the mock takes to deliver it.
struct Scripted {
    delay: Duration,
    /// Also hold for the full wait window the caller asked for.
    holds_window: bool,
    result: replicate_client::Result<Prediction>,
}

impl Scripted {
    fn after(delay: Duration, result: replicate_client::Result<Prediction>) -> Self {
        Self {
            delay,
            holds_window: false,
            result,
        }
    }

    async fn deliver(self, window: Duration) -> replicate_client::Result<Prediction> {
        let delay = if self.holds_window {
            window + self.delay
        } else {
            self.delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.result
    }
}

/// Scripted prediction API. Each call pops the next queued response and
/// errors once the queue is empty. Builder pattern: `.on_create()`,
/// `.on_wait()`, `.on_poll()`, `.always_poll()`, with `on_slow_*` variants
/// that delay the response.
pub struct MockPredictionApi {
    credentials: bool,
    creates: Mutex<VecDeque<Scripted>>,
    waits: Mutex<VecDeque<Scripted>>,
    polls: Mutex<VecDeque<Scripted>>,
    repeat_poll: Option<Prediction>,
    inputs: Mutex<Vec<(String, PredictionInput)>>,
    requested_waits: Mutex<Vec<Duration>>,
    create_calls: AtomicU32,
    wait_calls: AtomicU32,
    get_calls: AtomicU32,
}

impl MockPredictionApi {
    pub fn new() -> Self {
        Self {
            credentials: true,
            creates: Mutex::new(VecDeque::new()),
            waits: Mutex::new(VecDeque::new()),
            polls: Mutex::new(VecDeque::new()),
            repeat_poll: None,
            inputs: Mutex::new(Vec::new()),
            requested_waits: Mutex::new(Vec::new()),
            create_calls: AtomicU32::new(0),
            wait_calls: AtomicU32::new(0),
            get_calls: AtomicU32::new(0),
        }
    }

    pub fn without_credentials(mut self) -> Self {
        self.credentials = false;
        self
    }

    pub fn on_create(self, result: replicate_client::Result<Prediction>) -> Self {
        self.on_slow_create(Duration::ZERO, result)
    }

    pub fn on_slow_create(
        self,
        delay: Duration,
        result: replicate_client::Result<Prediction>,
    ) -> Self {
        self.creates
            .lock()
            .unwrap()
            .push_back(Scripted::after(delay, result));
        self
    }

    pub fn on_wait(self, result: replicate_client::Result<Prediction>) -> Self {
        self.on_slow_wait(Duration::ZERO, result)
    }

    /// Queue a blocking-endpoint response that arrives after `delay`.
    pub fn on_slow_wait(
        self,
        delay: Duration,
        result: replicate_client::Result<Prediction>,
    ) -> Self {
        self.waits
            .lock()
            .unwrap()
            .push_back(Scripted::after(delay, result));
        self
    }

    /// Queue a blocking-endpoint response that arrives `latency` after the
    /// requested wait window closes, the way the provider answers a
    /// prediction that is still running.
    pub fn on_held_wait(
        self,
        latency: Duration,
        result: replicate_client::Result<Prediction>,
    ) -> Self {
        self.waits.lock().unwrap().push_back(Scripted {
            delay: latency,
            holds_window: true,
            result,
        });
        self
    }

    pub fn on_poll(self, result: replicate_client::Result<Prediction>) -> Self {
        self.on_slow_poll(Duration::ZERO, result)
    }

    pub fn on_slow_poll(
        self,
        delay: Duration,
        result: replicate_client::Result<Prediction>,
    ) -> Self {
        self.polls
            .lock()
            .unwrap()
            .push_back(Scripted::after(delay, result));
        self
    }

    /// Response returned by every poll once the queued ones run out.
    pub fn always_poll(mut self, prediction: Prediction) -> Self {
        self.repeat_poll = Some(prediction);
        self
    }

    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn wait_calls(&self) -> u32 {
        self.wait_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> u32 {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Total calls of any kind.
    pub fn calls(&self) -> u32 {
        self.create_calls() + self.wait_calls() + self.get_calls()
    }

    /// Version and input of the most recent submission.
    pub fn last_submission(&self) -> Option<(String, PredictionInput)> {
        self.inputs.lock().unwrap().last().cloned()
    }

    /// Wait windows passed to the blocking endpoint, in call order.
    pub fn requested_waits(&self) -> Vec<Duration> {
        self.requested_waits.lock().unwrap().clone()
    }

    fn record(&self, version: &str, input: &PredictionInput) {
        self.inputs
            .lock()
            .unwrap()
            .push((version.to_string(), input.clone()));
    }
}

impl Default for MockPredictionApi {
    fn default() -> Self {
        Self::new()
    }
}

fn unscripted(call: &str) -> ReplicateError {
    ReplicateError::Network(format!("MockPredictionApi: no {call} response scripted"))
}

#[async_trait]
impl PredictionApi for MockPredictionApi {
    fn has_credentials(&self) -> bool {
        self.credentials
    }

    async fn create(
        &self,
        version: &str,
        input: &PredictionInput,
    ) -> replicate_client::Result<Prediction> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.record(version, input);
        let next = self.creates.lock().unwrap().pop_front();
        match next {
            Some(scripted) => scripted.deliver(Duration::ZERO).await,
            None => Err(unscripted("create")),
        }
    }

    async fn create_and_wait(
        &self,
        version: &str,
        input: &PredictionInput,
        wait: Duration,
    ) -> replicate_client::Result<Prediction> {
        self.wait_calls.fetch_add(1, Ordering::SeqCst);
        self.record(version, input);
        self.requested_waits.lock().unwrap().push(wait);
        let next = self.waits.lock().unwrap().pop_front();
        match next {
            Some(scripted) => scripted.deliver(wait).await,
            None => Err(unscripted("wait")),
        }
    }

    async fn get(&self, _poll_url: &str) -> replicate_client::Result<Prediction> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.polls.lock().unwrap().pop_front();
        match (next, &self.repeat_poll) {
            (Some(scripted), _) => scripted.deliver(Duration::ZERO).await,
            (None, Some(repeat)) => Ok(repeat.clone()),
            (None, None) => Err(unscripted("poll")),
        }
    }
}

// ---------------------------------------------------------------------------
// MockCounterStore
// ---------------------------------------------------------------------------

/// Counter store that always reports the same count, or always fails.
pub struct MockCounterStore {
    count: Option<u64>,
    calls: AtomicU32,
}

impl MockCounterStore {
    pub fn fixed(count: u64) -> Self {
        Self {
            count: Some(count),
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            count: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CounterStore for MockCounterStore {
    async fn increment(&self, _key: &str, _ttl: Duration) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.count {
            Some(count) => Ok(count),
            None => bail!("MockCounterStore: store unavailable"),
        }
    }
}
