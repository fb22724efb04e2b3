use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::models::ModelRegistry;

/// Largest `Prefer: wait` window the provider honours.
pub const MAX_SERVER_WAIT: Duration = Duration::from_secs(60);

/// Gap kept between the provider's wait window and the local attempt deadline,
/// so a still-running response arrives before the deadline fires.
pub const WAIT_HEADROOM: Duration = Duration::from_secs(2);

const MAX_POLL_ATTEMPTS: u32 = 1_000;
const MAX_RETRIES: u32 = 10;

/// Whole-second wait window requested from the provider for one blocking attempt.
pub fn server_wait_for(attempt_timeout: Duration) -> Duration {
    let secs = attempt_timeout.saturating_sub(WAIT_HEADROOM).as_secs();
    Duration::from_secs(secs.clamp(1, MAX_SERVER_WAIT.as_secs()))
}

/// Local deadline for one blocking attempt. Never shorter than the server
/// wait plus [`WAIT_HEADROOM`].
pub fn attempt_deadline_for(attempt_timeout: Duration) -> Duration {
    attempt_timeout.max(server_wait_for(attempt_timeout) + WAIT_HEADROOM)
}

/// How predictions are driven to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionMode {
    /// Submit, then poll the status URL on a fixed interval.
    Poll,
    /// Use the provider's blocking endpoint with per-attempt timeout and backoff.
    Blocking,
}

impl FromStr for PredictionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "poll" | "polling" => Ok(Self::Poll),
            "blocking" | "sync" | "wait" => Ok(Self::Blocking),
            other => Err(anyhow!("unknown prediction mode: {other}")),
        }
    }
}

/// Which counter store backs the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitStoreKind {
    /// Upstash when its credentials are present, otherwise no limiting.
    Auto,
    Upstash,
    Memory,
    Disabled,
}

impl FromStr for RateLimitStoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "upstash" | "redis" => Ok(Self::Upstash),
            "memory" => Ok(Self::Memory),
            "none" | "off" | "disabled" => Ok(Self::Disabled),
            other => Err(anyhow!("unknown rate limit store: {other}")),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Replicate
    pub replicate_api_key: Option<String>,
    pub replicate_base_url: String,
    pub replicate_request_timeout: Duration,
    pub model_name: String,

    // Prediction driving
    pub prediction_mode: PredictionMode,
    pub poll_interval: Duration,
    pub poll_max_attempts: u32,
    pub retry_max_retries: u32,
    pub retry_attempt_timeout: Duration,
    pub retry_base_delay: Duration,
    pub blocking_fallback_polls: u32,

    // Rate limiting
    pub rate_limit_store: RateLimitStoreKind,
    pub upstash_url: Option<String>,
    pub upstash_token: Option<String>,
    pub rate_limit_max: u32,
    pub rate_limit_window: Duration,
    pub trust_proxy_headers: bool,

    // Web server
    pub web_host: String,
    pub web_port: u16,
    pub platform_max_request: Duration,
}

impl Config {
    /// Load configuration from the process environment (and `.env` if present).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| env::var(key).ok())?;
        config.log_summary();
        Ok(config)
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            replicate_api_key: get("REPLICATE_API_KEY"),
            replicate_base_url: get("REPLICATE_BASE_URL")
                .unwrap_or_else(|| "https://api.replicate.com/v1".to_string()),
            replicate_request_timeout: Duration::from_millis(parse_or(
                &get,
                "REPLICATE_REQUEST_TIMEOUT_MS",
                2_000,
            )?),
            model_name: ModelRegistry::default_model_name(get("CURRENT_MODEL").as_deref()),
            prediction_mode: parse_or(&get, "PREDICTION_MODE", PredictionMode::Poll)?,
            poll_interval: Duration::from_millis(parse_or(&get, "POLL_INTERVAL_MS", 5_000)?),
            poll_max_attempts: parse_bounded(&get, "POLL_MAX_ATTEMPTS", 8, MAX_POLL_ATTEMPTS)?,
            retry_max_retries: parse_bounded(&get, "RETRY_MAX_RETRIES", 1, MAX_RETRIES)?,
            retry_attempt_timeout: Duration::from_millis(parse_or(
                &get,
                "RETRY_ATTEMPT_TIMEOUT_MS",
                15_000,
            )?),
            retry_base_delay: Duration::from_millis(parse_or(&get, "RETRY_BASE_DELAY_MS", 1_000)?),
            blocking_fallback_polls: parse_bounded(
                &get,
                "BLOCKING_FALLBACK_POLL_ATTEMPTS",
                3,
                MAX_POLL_ATTEMPTS,
            )?,
            rate_limit_store: parse_or(&get, "RATE_LIMIT_STORE", RateLimitStoreKind::Auto)?,
            upstash_url: get("UPSTASH_REDIS_REST_URL"),
            upstash_token: get("UPSTASH_REDIS_REST_TOKEN"),
            rate_limit_max: parse_or(&get, "RATE_LIMIT_MAX", 3)?,
            rate_limit_window: Duration::from_secs(parse_or(
                &get,
                "RATE_LIMIT_WINDOW_SECS",
                86_400,
            )?),
            trust_proxy_headers: parse_or(&get, "TRUST_PROXY_HEADERS", false)?,
            web_host: get("WEB_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            web_port: parse_or(&get, "WEB_PORT", 3000)?,
            platform_max_request: Duration::from_secs(parse_or(
                &get,
                "PLATFORM_MAX_REQUEST_SECS",
                60,
            )?),
        })
    }

    /// Worst-case time spent on one prediction, counting every provider call
    /// at its full timeout.
    ///
    /// Poll mode: submit, then `attempts` status checks with the interval
    /// between them. Blocking mode: every attempt at its deadline plus
    /// backoff, then the fallback polls of a still-running prediction.
    pub fn prediction_budget(&self) -> Duration {
        let call = self.replicate_request_timeout;
        match self.prediction_mode {
            PredictionMode::Poll => {
                call.saturating_add(polling_time(call, self.poll_interval, self.poll_max_attempts))
            }
            PredictionMode::Blocking => {
                let attempts = self.retry_max_retries.saturating_add(1);
                let backoff = (0..self.retry_max_retries)
                    .map(|n| self.retry_base_delay.saturating_mul(2u32.saturating_pow(n)))
                    .fold(Duration::ZERO, Duration::saturating_add);
                attempt_deadline_for(self.retry_attempt_timeout)
                    .saturating_mul(attempts)
                    .saturating_add(backoff)
                    .saturating_add(polling_time(
                        call,
                        self.poll_interval,
                        self.blocking_fallback_polls,
                    ))
            }
        }
    }

    pub fn upstash_credentials(&self) -> Option<(&str, &str)> {
        match (&self.upstash_url, &self.upstash_token) {
            (Some(url), Some(token)) => Some((url.as_str(), token.as_str())),
            _ => None,
        }
    }

    fn log_summary(&self) {
        fn preview_opt(val: &Option<String>) -> String {
            match val {
                Some(v) if !v.is_empty() => {
                    let n = v.char_indices().nth(5).map(|(i, _)| i).unwrap_or(v.len());
                    format!("{}...({} chars)", &v[..n], v.len())
                }
                _ => "<not set>".to_string(),
            }
        }

        tracing::info!("Config loaded:");
        tracing::info!("  REPLICATE_API_KEY: {}", preview_opt(&self.replicate_api_key));
        tracing::info!("  UPSTASH_REDIS_REST_URL: {}", preview_opt(&self.upstash_url));
        tracing::info!("  UPSTASH_REDIS_REST_TOKEN: {}", preview_opt(&self.upstash_token));
        tracing::info!(
            model = %self.model_name,
            mode = ?self.prediction_mode,
            store = ?self.rate_limit_store,
            trust_proxy_headers = self.trust_proxy_headers,
            "  generation settings"
        );

        let budget = self.prediction_budget();
        if budget >= self.platform_max_request {
            tracing::warn!(
                budget_secs = budget.as_secs_f64(),
                platform_max_secs = self.platform_max_request.as_secs_f64(),
                "Prediction budget exceeds the platform request limit"
            );
        }
    }
}

/// `attempts` status checks at `call` each, with `interval` between them.
fn polling_time(call: Duration, interval: Duration, attempts: u32) -> Duration {
    call.saturating_mul(attempts)
        .saturating_add(interval.saturating_mul(attempts.saturating_sub(1)))
}

fn parse_bounded(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u32,
    max: u32,
) -> Result<u32> {
    let value = parse_or(get, key, default)?;
    if value > max {
        return Err(anyhow!("{key} must be at most {max}, got {value}"));
    }
    Ok(value)
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{e}"))
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        None => Ok(default),
    }
}
