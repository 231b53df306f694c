//! HTTP transport: an OpenAI-compatible chat-completions endpoint backed by
//! the coordinator, plus a health probe.

pub mod api;
pub mod events;

use crate::config::Config;
use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;

/// Shared, immutable per-process state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let http = crate::providers::build_http_client(&config.http);
        Self {
            config: Arc::new(config),
            http,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let max_body_bytes = state.config.gateway.max_body_bytes;
    Router::new()
        .route("/health", get(api::handle_health))
        .route(
            "/openai/deployments/{deployment}/chat/completions",
            post(api::handle_chat_completions),
        )
        .layer(ServiceBuilder::new().layer(RequestBodyLimitLayer::new(max_body_bytes)))
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn run_gateway(host: &str, port: u16, config: Config) -> Result<()> {
    let deployment = config.gateway.deployment_name.clone();
    let listener = tokio::net::TcpListener::bind((host, port))
        .await
        .with_context(|| format!("Failed to bind {host}:{port}"))?;
    let local_addr = listener.local_addr()?;
    tracing::info!(
        %local_addr,
        deployment = %deployment,
        "Coordinator listening on /openai/deployments/{deployment}/chat/completions"
    );

    axum::serve(listener, build_router(AppState::new(config)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Gateway server error")?;
    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}
