use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};

use upstash_client::{UpstashClient, UpstashError};

const TOKEN: &str = "upstash-token";

#[derive(Clone, Default)]
struct FakeUpstash {
    counters: Arc<Mutex<HashMap<String, u64>>>,
    transactions: Arc<Mutex<Vec<Vec<Vec<String>>>>>,
}

/// Runs `SET key 0 PX ttl NX` and `INCR key` against an in-memory map.
fn run(counters: &mut HashMap<String, u64>, command: &[String]) -> Value {
    match command.first().map(String::as_str) {
        Some("SET") if command.last().map(String::as_str) == Some("NX") => {
            if counters.contains_key(&command[1]) {
                json!({ "result": null })
            } else {
                counters.insert(command[1].clone(), 0);
                json!({ "result": "OK" })
            }
        }
        Some("INCR") => {
            let count = counters.entry(command[1].clone()).or_insert(0);
            *count += 1;
            json!({ "result": *count })
        }
        _ => json!({ "error": "ERR unknown command" }),
    }
}

async fn multi_exec(
    State(fake): State<FakeUpstash>,
    headers: HeaderMap,
    Json(commands): Json<Vec<Vec<String>>>,
) -> Response {
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"));
    if !authorized {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" }))).into_response();
    }

    fake.transactions.lock().unwrap().push(commands.clone());
    let mut counters = fake.counters.lock().unwrap();
    let results: Vec<Value> = commands.iter().map(|c| run(&mut counters, c)).collect();
    Json(results).into_response()
}

async fn fake_upstash() -> (FakeUpstash, String) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let fake = FakeUpstash::default();

    let app = Router::new()
        .route("/multi-exec", post(multi_exec))
        .with_state(fake.clone());
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    (fake, url)
}

#[tokio::test]
async fn incr_with_ttl_sends_one_set_nx_incr_transaction() {
    let (fake, url) = fake_upstash().await;
    let client = UpstashClient::new(&url, TOKEN);

    let count = client.incr_with_ttl("ratelimit:1.2.3.4:0", 86_400_000).await.unwrap();
    assert_eq!(count, 1);

    let transactions = fake.transactions.lock().unwrap().clone();
    assert_eq!(
        transactions,
        vec![vec![
            vec!["SET", "ratelimit:1.2.3.4:0", "0", "PX", "86400000", "NX"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>(),
            vec!["INCR".to_string(), "ratelimit:1.2.3.4:0".to_string()],
        ]]
    );
}

#[tokio::test]
async fn repeated_increments_count_up_per_key() {
    let (_fake, url) = fake_upstash().await;
    let client = UpstashClient::new(&format!("{url}/"), TOKEN);

    for expected in 1..=3 {
        assert_eq!(client.incr_with_ttl("a", 1_000).await.unwrap(), expected);
    }
    assert_eq!(client.incr_with_ttl("b", 1_000).await.unwrap(), 1);
}

#[tokio::test]
async fn rejected_token_is_api_error() {
    let (fake, url) = fake_upstash().await;
    let client = UpstashClient::new(&url, "wrong");

    let err = client.incr_with_ttl("a", 1_000).await.unwrap_err();
    assert!(matches!(err, UpstashError::Api { status: 401, .. }));
    assert!(fake.transactions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn command_errors_are_surfaced() {
    let (_fake, url) = fake_upstash().await;
    let client = UpstashClient::new(&url, TOKEN);

    let err = client
        .transaction(&[vec!["FLUSHALL".to_string()]])
        .await
        .unwrap_err();
    assert!(matches!(err, UpstashError::Command(msg) if msg.contains("unknown command")));
}
