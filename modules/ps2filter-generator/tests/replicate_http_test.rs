// Strategies driven through the real Replicate client against a local
// fake that holds blocking requests for the full `Prefer: wait` window.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use ps2filter_common::{GenerationError, ModelRegistry, PredictionMode};
use ps2filter_generator::{
    strategy_for, JobState, ModelInput, PollBudget, PredictionClient, RetryPolicy,
};
use replicate_client::ReplicateClient;

#[derive(Clone)]
struct FakeReplicate {
    base: String,
    poll_path: &'static str,
    creates: Arc<AtomicU32>,
}

async fn create(State(fake): State<FakeReplicate>, headers: HeaderMap) -> Response {
    fake.creates.fetch_add(1, Ordering::SeqCst);

    let wait_secs = headers
        .get("prefer")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("wait="))
        .and_then(|v| v.parse::<u64>().ok());
    if let Some(secs) = wait_secs {
        tokio::time::sleep(Duration::from_secs(secs) + Duration::from_millis(20)).await;
    }

    Json(json!({
        "id": "p1",
        "status": "processing",
        "urls": { "get": format!("{}{}", fake.base, fake.poll_path) },
    }))
    .into_response()
}

async fn finished() -> Response {
    Json(json!({
        "id": "p1",
        "status": "succeeded",
        "output": ["https://replicate.delivery/out.png"],
    }))
    .into_response()
}

async fn hung() -> Response {
    tokio::time::sleep(Duration::from_secs(3600)).await;
    finished().await
}

async fn fake_replicate(poll_path: &'static str) -> FakeReplicate {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let fake = FakeReplicate {
        base: format!("http://{}", listener.local_addr().unwrap()),
        poll_path,
        creates: Arc::new(AtomicU32::new(0)),
    };

    let app = Router::new()
        .route("/predictions", post(create))
        .route("/predictions/p1", get(finished))
        .route("/predictions/hung", get(hung))
        .with_state(fake.clone());
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    fake
}

fn client(fake: &FakeReplicate) -> PredictionClient {
    let api = ReplicateClient::new("r8_test").with_base_url(&fake.base);
    PredictionClient::new(Arc::new(api))
}

fn model() -> ps2filter_common::ModelDescriptor {
    ModelRegistry::builtin().get("face-to-many").unwrap().clone()
}

#[tokio::test]
async fn blocking_submit_outlasts_the_server_wait_window() {
    let fake = fake_replicate("/predictions/p1").await;
    let strategy = strategy_for(
        PredictionMode::Blocking,
        client(&fake),
        PollBudget {
            interval: Duration::from_millis(50),
            max_attempts: 3,
        },
        RetryPolicy {
            max_retries: 2,
            attempt_timeout: Duration::from_secs(1),
            base_delay: Duration::from_millis(10),
            fallback_polls: 3,
        },
    );

    let job = strategy.submit(&model(), &ModelInput::new()).await.unwrap();
    assert_eq!(job.state, JobState::Processing);
    assert_eq!(fake.creates.load(Ordering::SeqCst), 1);

    let done = strategy.await_terminal(job).await.unwrap();
    assert_eq!(done.state, JobState::Succeeded);
    assert_eq!(fake.creates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn hung_status_endpoint_ends_in_timeout() {
    let fake = fake_replicate("/predictions/hung").await;
    let client = client(&fake).with_request_timeout(Duration::from_millis(200));

    let job = client.submit(&model(), &ModelInput::new()).await.unwrap();
    let started = Instant::now();
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        client.run_until_terminal(job, Duration::from_millis(100), 2),
    )
    .await
    .expect("poll loop stays within its budget");

    assert_eq!(result.unwrap_err(), GenerationError::Timeout { attempts: 2 });
    assert!(started.elapsed() < Duration::from_secs(2));
}
