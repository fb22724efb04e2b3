pub mod error;

pub use error::{Result, UpstashError};

use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// One entry of a pipeline or transaction response.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandResult {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

pub struct UpstashClient {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl UpstashClient {
    pub fn new(url: &str, token: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();

        Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    /// Run commands atomically (MULTI/EXEC) via the `/multi-exec` endpoint.
    pub async fn transaction(&self, commands: &[Vec<String>]) -> Result<Vec<CommandResult>> {
        let endpoint = format!("{}/multi-exec", self.url);
        let resp = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.token)
            .json(commands)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(UpstashError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        parse_transaction(&body, commands.len())
    }

    /// Increment `key`, creating it with a `ttl_ms` expiry if it does not exist.
    /// Both steps run in one transaction so concurrent callers see distinct counts.
    pub async fn incr_with_ttl(&self, key: &str, ttl_ms: u64) -> Result<u64> {
        let commands = vec![
            vec![
                "SET".to_string(),
                key.to_string(),
                "0".to_string(),
                "PX".to_string(),
                ttl_ms.max(1).to_string(),
                "NX".to_string(),
            ],
            vec!["INCR".to_string(), key.to_string()],
        ];

        let results = self.transaction(&commands).await?;
        let count = integer_result(&results[1])?;
        tracing::debug!(key, count, "Upstash counter incremented");
        Ok(count)
    }
}

fn parse_transaction(body: &str, expected: usize) -> Result<Vec<CommandResult>> {
    let results: Vec<CommandResult> = serde_json::from_str(body)?;
    if results.len() != expected {
        return Err(UpstashError::Parse(format!(
            "expected {expected} results, got {}",
            results.len()
        )));
    }
    if let Some(err) = results.iter().find_map(|r| r.error.clone()) {
        return Err(UpstashError::Command(err));
    }
    Ok(results)
}

fn integer_result(result: &CommandResult) -> Result<u64> {
    match &result.result {
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| UpstashError::Parse(format!("not a counter value: {n}"))),
        Some(Value::String(s)) => s
            .parse()
            .map_err(|_| UpstashError::Parse(format!("not a counter value: {s}"))),
        other => Err(UpstashError::Parse(format!(
            "unexpected command result: {other:?}"
        ))),
    }
}
