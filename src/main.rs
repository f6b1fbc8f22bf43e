mod config;
mod gateway;
mod gemini;
mod models;
mod pipeline;
mod prompts;
mod routes;
mod schema;
mod session;
mod studio;
#[cfg(test)]
mod testing;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{AccessGate, Config};
use crate::gateway::HttpImageFetcher;
use crate::gemini::GeminiClient;
use crate::routes::AppState;
use crate::studio::Studio;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = Config::from_env()?;
    let access = AccessGate::new(config.gemini.api_key.is_some());
    match &config.gemini.api_key {
        Some(key) => tracing::info!("🔑 Using API key: {}...", key.chars().take(4).collect::<String>()),
        None => tracing::warn!("⚠️ GEMINI_API_KEY is not set; the studio stays locked until a key is configured"),
    }
    tracing::info!(
        text_model = %config.gemini.text_model,
        image_model = %config.gemini.image_model,
        "Gemini models configured"
    );

    let studio = Studio::new(Arc::new(GeminiClient::new(config.gemini)), Arc::new(HttpImageFetcher::new()));
    let app = routes::router(AppState { studio, access });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "Starting server");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("👋 Shutting down");
}
