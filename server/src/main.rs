//! VisionRTC Server - WebSocket signaling for browser video sessions

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use visionrtc_server::{AppState, CliArgs, ServerConfig};

fn init_tracing(default_filter: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let config = ServerConfig::load(&args)?;

    init_tracing(&config.logging.level, config.logging.json);

    info!("Starting VisionRTC Server v{}", env!("CARGO_PKG_VERSION"));
    info!(config = ?args.config, device = ?config.media.device, "Configuration loaded");

    let state = Arc::new(AppState::new(&config).context("Failed to initialize application state")?);
    let cleanup = state.start_background_tasks();

    let addr = config.bind_addr()?;
    let listener = visionrtc_server::bind(addr).await?;

    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        info!("Received Ctrl+C, shutting down");
        shutdown.cancel();
    });

    visionrtc_server::serve(listener, state.clone(), &config.http.cors_origins)
        .await
        .context("Signaling server error")?;

    state.shutdown.cancel();
    cleanup.await.context("Cleanup task failed")?;

    let stats = state.hub.manager().stats().await;
    info!(
        total_sessions = stats.total_sessions,
        failed_sessions = stats.failed_sessions,
        "Server shut down cleanly"
    );
    Ok(())
}
