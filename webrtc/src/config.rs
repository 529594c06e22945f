//! Configuration types for the signaling core
//!
//! A [`WebRtcConfig`] is loaded once at process start and shared read-only
//! (`Arc<WebRtcConfig>`) by every session.

use serde::{Deserialize, Serialize};
use std::time::Duration;

const ICE_URL_SCHEMES: &[&str] = &["stun:", "stuns:", "turn:", "turns:"];

/// Configuration for the session manager and its transports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebRtcConfig {
    /// ICE servers handed to every peer connection
    pub ice_servers: Vec<IceServerConfig>,

    /// Maximum number of concurrent sessions
    pub max_sessions: usize,

    /// Idle sessions older than this are swept
    pub session_timeout: Duration,

    /// Cleanup interval for stale sessions
    pub cleanup_interval: Duration,

    /// Upper bound for a single transport call (offer apply, answer creation)
    pub negotiation_timeout: Duration,

    /// How long an answered session may wait for live connectivity
    pub connect_timeout: Duration,

    /// Maximum inbound signaling message size (bytes)
    pub max_message_size: usize,

    /// Minimum spacing between analysis results sent to one client
    pub analysis_interval: Duration,

    /// Codec used for the server's outbound video track
    pub video_codec: VideoCodecConfig,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![
                IceServerConfig::stun("stun:stun.l.google.com:19302"),
                IceServerConfig::stun("stun:stun1.l.google.com:19302"),
            ],
            max_sessions: 100,
            session_timeout: Duration::from_secs(300), // 5 minutes
            cleanup_interval: Duration::from_secs(60), // 1 minute
            negotiation_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(30),
            max_message_size: 64 * 1024,
            analysis_interval: Duration::from_secs(2),
            video_codec: VideoCodecConfig::default(),
        }
    }
}

/// ICE server descriptor (STUN or TURN)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    /// Server URLs (`stun:host:port`, `turn:host:port?transport=udp`, ...)
    pub urls: Vec<String>,

    /// TURN username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// TURN credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServerConfig {
    /// A credential-less STUN server
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    /// A TURN server with credentials
    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls: vec![url.into()],
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }

    fn is_turn(&self) -> bool {
        self.urls.iter().any(|u| u.starts_with("turn:") || u.starts_with("turns:"))
    }

    fn validate(&self) -> Result<(), String> {
        if self.urls.is_empty() {
            return Err("ICE server entry has no urls".to_string());
        }
        for url in &self.urls {
            if !ICE_URL_SCHEMES.iter().any(|scheme| url.starts_with(scheme)) {
                return Err(format!("ICE server url '{}' has no stun/turn scheme", url));
            }
        }
        if self.is_turn() && (self.username.is_none() || self.credential.is_none()) {
            return Err(format!(
                "TURN server {:?} requires username and credential",
                self.urls
            ));
        }
        Ok(())
    }
}

/// Codec parameters for the outbound video track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoCodecConfig {
    /// MIME type, e.g. `video/VP8`
    pub mime_type: String,
    /// RTP payload type used when a media section has to be synthesized
    pub payload_type: u8,
    /// RTP clock rate
    pub clock_rate: u32,
}

impl Default for VideoCodecConfig {
    fn default() -> Self {
        Self {
            mime_type: "video/VP8".to_string(),
            payload_type: 96,
            clock_rate: 90_000,
        }
    }
}

impl VideoCodecConfig {
    /// Encoding name as it appears in `a=rtpmap` (`VP8` for `video/VP8`)
    pub fn encoding_name(&self) -> &str {
        self.mime_type
            .split_once('/')
            .map(|(_, name)| name)
            .unwrap_or(&self.mime_type)
    }
}

impl WebRtcConfig {
    /// Create config from environment variables on top of the defaults
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `WEBRTC_*` environment overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(val) = env_parse::<usize>("WEBRTC_MAX_SESSIONS") {
            self.max_sessions = val;
        }

        if let Some(val) = env_parse::<u64>("WEBRTC_SESSION_TIMEOUT") {
            self.session_timeout = Duration::from_secs(val);
        }

        if let Some(val) = env_parse::<u64>("WEBRTC_CONNECT_TIMEOUT") {
            self.connect_timeout = Duration::from_secs(val);
        }

        if let Some(val) = env_parse::<u64>("WEBRTC_NEGOTIATION_TIMEOUT") {
            self.negotiation_timeout = Duration::from_secs(val);
        }

        if let Ok(urls) = std::env::var("WEBRTC_STUN_SERVERS") {
            let servers: Vec<IceServerConfig> = urls
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(IceServerConfig::stun)
                .collect();
            if !servers.is_empty() {
                self.ice_servers = servers;
            }
        }

        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_sessions == 0 {
            return Err("max_sessions must be > 0".to_string());
        }

        if self.max_message_size == 0 {
            return Err("max_message_size must be > 0".to_string());
        }

        if self.negotiation_timeout.is_zero() || self.connect_timeout.is_zero() {
            return Err("negotiation and connect timeouts must be > 0".to_string());
        }

        if !self.video_codec.mime_type.starts_with("video/") {
            return Err(format!(
                "video codec '{}' is not a video mime type",
                self.video_codec.mime_type
            ));
        }

        for server in &self.ice_servers {
            server.validate()?;
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
