//! Shared application state for the VisionRTC server.
//!
//! One [`SignalingHub`] (and through it one session manager) serves every
//! connection; handlers only ever see it behind an `Arc`.

use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use visionrtc_media::{DeviceProvider, FrameStatsAnalyzer, SyntheticSource, UnavailableDevice};
use visionrtc_webrtc::{
    PeerSessionManager, RtcTransportFactory, SignalingHub, TransportFactory, WebRtcConfig,
};

use crate::config::{DeviceKind, ServerConfig};
use crate::error::{ServerError, ServerResult};

/// Shared application state.
pub struct AppState {
    /// Signaling hub for `/ws` connections
    pub hub: Arc<SignalingHub>,

    /// Queue depth between a socket and its worker
    pub channel_capacity: usize,

    /// Process start, for `/health`
    pub started_at: Instant,

    /// Cancelled on shutdown; stops background tasks
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Build state with real WebRTC transports.
    pub fn new(config: &ServerConfig) -> ServerResult<Self> {
        let webrtc = Arc::new(config.webrtc.to_webrtc_config());
        let transports = Arc::new(RtcTransportFactory::new(webrtc.clone()));
        Self::with_transports(config, webrtc, transports)
    }

    /// Build state on top of a custom transport factory.
    ///
    /// `webrtc` is shared with the manager as-is; the factory should hold
    /// the same instance.
    pub fn with_transports(
        config: &ServerConfig,
        webrtc: Arc<WebRtcConfig>,
        transports: Arc<dyn TransportFactory>,
    ) -> ServerResult<Self> {
        webrtc.validate().map_err(ServerError::Config)?;

        let devices: Arc<dyn DeviceProvider> = match config.media.device {
            DeviceKind::Synthetic => Arc::new(SyntheticSource::new(config.media.synthetic.clone())),
            DeviceKind::None => Arc::new(UnavailableDevice::new("capture disabled by configuration")),
        };

        let manager = Arc::new(PeerSessionManager::new(webrtc, transports, devices));
        let hub = Arc::new(SignalingHub::new(manager, Arc::new(FrameStatsAnalyzer)));

        tracing::info!(device = ?config.media.device, "Application state initialized");

        Ok(Self {
            hub,
            channel_capacity: config.http.channel_capacity,
            started_at: Instant::now(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Start the stale-session sweeper; it stops when `shutdown` is cancelled.
    pub fn start_background_tasks(&self) -> JoinHandle<()> {
        self.hub
            .manager()
            .start_cleanup_task(self.shutdown.child_token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_state_from_default_config() {
        let state = AppState::new(&ServerConfig::default()).unwrap();
        assert_eq!(state.hub.connection_count(), 0);
        assert_eq!(state.hub.manager().session_count().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_webrtc_config_rejected() {
        let mut config = ServerConfig::default();
        config.webrtc.max_message_size = 0;

        let result = AppState::new(&config);
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[tokio::test]
    async fn test_manager_uses_given_webrtc_config() {
        let mut config = ServerConfig::default();
        config.webrtc.max_sessions = 7;
        let webrtc = Arc::new(config.webrtc.to_webrtc_config());
        let transports = Arc::new(visionrtc_webrtc::testing::MockTransportFactory::new());

        let state = AppState::with_transports(&config, webrtc.clone(), transports).unwrap();
        let shared = state.hub.manager().config();
        assert!(Arc::ptr_eq(shared, &webrtc));
        assert_eq!(shared.max_sessions, 7);
    }

    #[tokio::test]
    async fn test_cleanup_task_stops_on_shutdown() {
        let state = AppState::new(&ServerConfig::default()).unwrap();
        let task = state.start_background_tasks();

        state.shutdown.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
