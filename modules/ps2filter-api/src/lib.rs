use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue},
    routing::{get, post},
    Router,
};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{info, warn};

use ps2filter_common::{Config, RateLimitStoreKind};
use ps2filter_generator::{
    strategy_for, CounterStore, GenerationOrchestrator, MemoryCounterStore, PollBudget,
    PredictionClient, RateLimiter, RetryPolicy,
};
use replicate_client::ReplicateClient;
use upstash_client::UpstashClient;

pub mod rest;

pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; \
script-src 'self' 'unsafe-eval' 'unsafe-inline' 'wasm-unsafe-eval' 'inline-speculation-rules' https:; \
style-src 'self' 'unsafe-inline' https:; img-src * data: blob:; font-src 'self' data: https:; \
connect-src 'self' https: wss: api.replicate.com; worker-src 'self' blob:; frame-src 'self' https:; \
media-src 'self' https:; object-src 'none'; base-uri 'self'; form-action 'self'; \
frame-ancestors 'none'; upgrade-insecure-requests;";

pub struct AppState {
    pub orchestrator: GenerationOrchestrator,
    /// Take the client address from forwarding headers before the peer address.
    pub trust_proxy_headers: bool,
}

/// Wire the orchestrator and its collaborators from configuration.
pub fn build_state(config: &Config) -> AppState {
    let api = ReplicateClient::new(config.replicate_api_key.clone().unwrap_or_default())
        .with_base_url(&config.replicate_base_url)
        .with_timeout(config.replicate_request_timeout);

    let predictions = strategy_for(
        config.prediction_mode,
        PredictionClient::new(Arc::new(api))
            .with_request_timeout(config.replicate_request_timeout),
        PollBudget::from_config(config),
        RetryPolicy::from_config(config),
    );

    let orchestrator = GenerationOrchestrator::builder()
        .model_name(config.model_name.clone())
        .limiter(build_rate_limiter(config))
        .predictions(predictions)
        .build();

    if config.trust_proxy_headers {
        info!("Client addresses taken from forwarding headers");
    }

    AppState {
        orchestrator,
        trust_proxy_headers: config.trust_proxy_headers,
    }
}

fn build_rate_limiter(config: &Config) -> RateLimiter {
    let store: Option<Arc<dyn CounterStore>> =
        match (config.rate_limit_store, config.upstash_credentials()) {
            (RateLimitStoreKind::Disabled, _) => None,
            (RateLimitStoreKind::Memory, _) => Some(Arc::new(MemoryCounterStore::new())),
            (RateLimitStoreKind::Auto | RateLimitStoreKind::Upstash, Some((url, token))) => {
                Some(Arc::new(UpstashClient::new(url, token)))
            }
            (RateLimitStoreKind::Upstash, None) => {
                warn!("RATE_LIMIT_STORE=upstash but Upstash credentials are missing");
                None
            }
            (RateLimitStoreKind::Auto, None) => None,
        };

    match store {
        Some(store) => {
            info!(
                limit = config.rate_limit_max,
                window_secs = config.rate_limit_window.as_secs(),
                "Rate limiting enabled"
            );
            RateLimiter::new(store, config.rate_limit_max, config.rate_limit_window)
        }
        None => {
            warn!("No rate limit store configured, all requests are allowed");
            RateLimiter::disabled()
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/api/generate", post(rest::generate::api_generate))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(SetResponseHeaderLayer::overriding(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(CONTENT_SECURITY_POLICY),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        // Logging layer: method + path only (no query params, no IP)
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        )
}
