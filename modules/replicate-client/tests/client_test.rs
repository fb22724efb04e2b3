use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Map, Value};

use replicate_client::{PredictionStatus, ReplicateClient, ReplicateError};

const TOKEN: &str = "r8_test_token";

/// What the fake provider saw for one create call.
#[derive(Debug, Clone)]
struct Seen {
    authorization: Option<String>,
    prefer: Option<String>,
    body: Value,
}

#[derive(Clone)]
struct FakeReplicate {
    base: String,
    seen: Arc<Mutex<Vec<Seen>>>,
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name)?.to_str().ok().map(str::to_string)
}

async fn create(
    State(fake): State<FakeReplicate>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let authorization = header(&headers, "authorization");
    let prefer = header(&headers, "prefer");
    fake.seen.lock().unwrap().push(Seen {
        authorization: authorization.clone(),
        prefer: prefer.clone(),
        body: body.clone(),
    });

    if authorization.as_deref() != Some(format!("Bearer {TOKEN}").as_str()) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "detail": "Invalid token." })))
            .into_response();
    }
    if body["version"] == "missing" {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "detail": "version does not exist" })),
        )
            .into_response();
    }

    // a wait request finishes inside the window, a plain create does not
    let (status, output) = match prefer {
        Some(_) => ("succeeded", json!(["https://replicate.delivery/out.png"])),
        None => ("starting", Value::Null),
    };
    Json(json!({
        "id": "p1",
        "status": status,
        "output": output,
        "urls": { "get": format!("{}/predictions/p1", fake.base) },
    }))
    .into_response()
}

async fn status(Path(id): Path<String>) -> Response {
    match id.as_str() {
        "p1" => Json(json!({
            "id": "p1",
            "status": "processing",
        }))
        .into_response(),
        "hung" => {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            StatusCode::OK.into_response()
        }
        "garbled" => "not json".into_response(),
        _ => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn fake_replicate() -> FakeReplicate {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let fake = FakeReplicate {
        base: format!("http://{}", listener.local_addr().unwrap()),
        seen: Arc::new(Mutex::new(Vec::new())),
    };

    let app = Router::new()
        .route("/predictions", post(create))
        .route("/predictions/{id}", get(status))
        .with_state(fake.clone());
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    fake
}

fn input() -> Map<String, Value> {
    let mut input = Map::new();
    input.insert("image".into(), json!("https://upcdn.io/raw/me.jpg"));
    input
}

#[tokio::test]
async fn create_sends_bearer_token_and_version() {
    let fake = fake_replicate().await;
    let client = ReplicateClient::new(TOKEN).with_base_url(&fake.base);

    let prediction = client.create_prediction("v123", &input()).await.unwrap();

    assert_eq!(prediction.status, PredictionStatus::Starting);
    assert_eq!(
        prediction.poll_url(),
        Some(format!("{}/predictions/p1", fake.base).as_str())
    );

    let seen = fake.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].authorization.as_deref(), Some("Bearer r8_test_token"));
    assert!(seen[0].prefer.is_none());
    assert_eq!(seen[0].body["version"], "v123");
    assert_eq!(seen[0].body["input"]["image"], "https://upcdn.io/raw/me.jpg");
}

#[tokio::test]
async fn blocking_create_sends_clamped_prefer_header() {
    let fake = fake_replicate().await;
    let client = ReplicateClient::new(TOKEN).with_base_url(&fake.base);

    let prediction = client
        .create_prediction_and_wait("v123", &input(), 13)
        .await
        .unwrap();
    assert_eq!(prediction.status, PredictionStatus::Succeeded);

    client
        .create_prediction_and_wait("v123", &input(), 600)
        .await
        .unwrap();

    let prefer: Vec<_> = fake
        .seen
        .lock()
        .unwrap()
        .iter()
        .map(|s| s.prefer.clone())
        .collect();
    assert_eq!(prefer, vec![Some("wait=13".to_string()), Some("wait=60".to_string())]);
}

#[tokio::test]
async fn rejected_token_is_unauthorized() {
    let fake = fake_replicate().await;
    let client = ReplicateClient::new("wrong").with_base_url(&fake.base);

    let err = client.create_prediction("v123", &input()).await.unwrap_err();
    assert!(matches!(err, ReplicateError::Unauthorized(body) if body.contains("Invalid token")));
}

#[tokio::test]
async fn non_success_status_is_api_error_with_body() {
    let fake = fake_replicate().await;
    let client = ReplicateClient::new(TOKEN).with_base_url(&fake.base);

    let err = client.create_prediction("missing", &input()).await.unwrap_err();
    match err {
        ReplicateError::Api { status, message } => {
            assert_eq!(status, 422);
            assert!(message.contains("version does not exist"));
        }
        other => panic!("expected Api error, got {other:?}"),
    }

    let err = client
        .get_prediction(&format!("{}/predictions/down", fake.base))
        .await
        .unwrap_err();
    assert!(matches!(err, ReplicateError::Api { status: 503, .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn get_follows_poll_url() {
    let fake = fake_replicate().await;
    let client = ReplicateClient::new(TOKEN).with_base_url(&fake.base);

    let prediction = client
        .get_prediction(&format!("{}/predictions/p1", fake.base))
        .await
        .unwrap();
    assert_eq!(prediction.id.as_deref(), Some("p1"));
    assert_eq!(prediction.status, PredictionStatus::Processing);
}

#[tokio::test]
async fn unparseable_body_is_parse_error() {
    let fake = fake_replicate().await;
    let client = ReplicateClient::new(TOKEN).with_base_url(&fake.base);

    let err = client
        .get_prediction(&format!("{}/predictions/garbled", fake.base))
        .await
        .unwrap_err();
    assert!(matches!(err, ReplicateError::Parse(_)));
}

#[tokio::test]
async fn hung_status_check_times_out_as_network_error() {
    let fake = fake_replicate().await;
    let client = ReplicateClient::new(TOKEN)
        .with_base_url(&fake.base)
        .with_timeout(Duration::from_millis(200));

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        client.get_prediction(&format!("{}/predictions/hung", fake.base)),
    )
    .await
    .expect("request timeout fires before the guard");

    let err = result.unwrap_err();
    assert!(matches!(err, ReplicateError::Network(_)));
    assert!(err.is_transient());
}
