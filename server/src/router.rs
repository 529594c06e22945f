//! Router configuration and setup.
//!
//! - `GET /ws` - signaling WebSocket
//! - `GET /health` - liveness and counters
//! - `GET /sessions` - every live session plus manager stats
//! - `GET /sessions/{client_id}` - one client's session

use std::sync::Arc;

use axum::{
    extract::{Path, State, WebSocketUpgrade},
    http::HeaderValue,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use uuid::Uuid;
use visionrtc_webrtc::{ClientId, SessionInfo, WebRtcStats};

use crate::{
    error::{ServerError, ServerResult},
    state::AppState,
    ws,
};

/// Health payload
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub connections: usize,
    pub sessions: usize,
}

/// `/sessions` payload
#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionInfo>,
    pub stats: WebRtcStats,
}

/// Build the application router.
pub fn configure_routes(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health))
        .route("/sessions", get(list_sessions))
        .route("/sessions/{client_id}", get(get_session))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(tracing::Level::INFO))
                .on_response(DefaultOnResponse::new().level(tracing::Level::DEBUG)),
        )
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new().allow_origin(AllowOrigin::list(allowed))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let max = state.hub.manager().config().max_message_size;
    ws.max_message_size(max.saturating_mul(2))
        .on_upgrade(move |socket| ws::handle_socket(socket, state))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        connections: state.hub.connection_count(),
        sessions: state.hub.manager().session_count().await,
    })
}

async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<SessionsResponse> {
    let manager = state.hub.manager();
    Json(SessionsResponse {
        sessions: manager.list_sessions().await,
        stats: manager.stats().await,
    })
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> ServerResult<Json<SessionInfo>> {
    let uuid = Uuid::parse_str(&client_id)
        .map_err(|e| ServerError::InvalidRequest(format!("bad client id '{}': {}", client_id, e)))?;

    state
        .hub
        .manager()
        .session_info(ClientId::from(uuid))
        .await
        .map(Json)
        .ok_or_else(|| ServerError::NotFound(format!("no session for client {}", client_id)))
}
