use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ps2filter_api::{build_router, build_state};
use ps2filter_common::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("ps2filter=info".parse()?))
        .init();

    let config = Config::from_env()?;
    let state = Arc::new(build_state(&config));

    info!(
        model = state.orchestrator.model_name(),
        mode = state.orchestrator.strategy_name(),
        "Generator ready"
    );

    let app = build_router(state);

    let addr = format!("{}:{}", config.web_host, config.web_port);
    info!("PS2 filter API starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
