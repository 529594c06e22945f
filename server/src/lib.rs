//! VisionRTC Server
//!
//! Hosts the signaling hub behind axum:
//! - `/ws` carries the JSON signaling protocol (see `visionrtc-webrtc`)
//! - `/health` and `/sessions` expose liveness and session state
//!
//! Session logic lives in `visionrtc-webrtc`, not here.

pub mod config;
pub mod error;
pub mod router;
pub mod state;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

pub use config::{CliArgs, DeviceKind, ServerConfig};
pub use error::{ServerError, ServerResult};
pub use state::AppState;

/// Bind the configured address.
pub async fn bind(addr: SocketAddr) -> ServerResult<TcpListener> {
    TcpListener::bind(addr).await.map_err(|source| ServerError::Bind {
        addr: addr.to_string(),
        source,
    })
}

/// Serve until `state.shutdown` is cancelled.
pub async fn serve(listener: TcpListener, state: Arc<AppState>, cors_origins: &[String]) -> ServerResult<()> {
    let addr = listener.local_addr()?;
    let shutdown = state.shutdown.clone();
    let app = router::configure_routes(state, cors_origins);

    tracing::info!("Signaling server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("Signaling server stopped");
    Ok(())
}
