//! Configuration for the VisionRTC server.
//!
//! Sources, lowest priority first:
//! - Defaults
//! - TOML config file
//! - CLI arguments and their `VISIONRTC_*` environment variables
//! - `WEBRTC_*` environment overrides for the session manager

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use visionrtc_media::SyntheticConfig;
use visionrtc_webrtc::{IceServerConfig, VideoCodecConfig, WebRtcConfig};

/// Command-line arguments for the VisionRTC server.
#[derive(Parser, Debug, Clone)]
#[command(name = "visionrtc-server")]
#[command(about = "VisionRTC signaling server")]
#[command(version)]
pub struct CliArgs {
    /// Address to bind
    #[arg(long, env = "VISIONRTC_HOST")]
    pub host: Option<String>,

    /// Port to bind
    #[arg(long, short = 'p', env = "VISIONRTC_PORT")]
    pub port: Option<u16>,

    /// Configuration file path
    #[arg(long, short = 'c', default_value = "visionrtc.toml", env = "VISIONRTC_CONFIG")]
    pub config: PathBuf,

    /// Log filter, e.g. `info` or `visionrtc_webrtc=trace`
    #[arg(long, env = "VISIONRTC_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Emit JSON log lines
    #[arg(long, env = "VISIONRTC_LOG_JSON")]
    pub log_json: bool,

    /// Media source backing outbound tracks
    #[arg(long, env = "VISIONRTC_DEVICE")]
    pub device: Option<DeviceKind>,
}

/// Media source selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Generated test pattern
    Synthetic,
    /// No capture device; every session gets an empty track
    None,
}

/// Full server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP listener
    pub http: HttpConfig,
    /// Session manager and transports
    pub webrtc: WebRtcSection,
    /// Media source
    pub media: MediaConfig,
    /// Logging
    pub logging: LoggingConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins; `*` allows any
    pub cors_origins: Vec<String>,
    /// Queue depth between a socket and its worker, each direction
    pub channel_capacity: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: vec!["*".to_string()],
            channel_capacity: 64,
        }
    }
}

/// WebRTC settings as written in TOML, durations in whole units.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRtcSection {
    pub ice_servers: Vec<IceServerConfig>,
    pub max_sessions: usize,
    pub session_timeout_secs: u64,
    pub cleanup_interval_secs: u64,
    pub negotiation_timeout_ms: u64,
    pub connect_timeout_secs: u64,
    pub max_message_size: usize,
    pub analysis_interval_ms: u64,
    pub video_codec: VideoCodecConfig,
}

impl Default for WebRtcSection {
    fn default() -> Self {
        let defaults = WebRtcConfig::default();
        Self {
            ice_servers: defaults.ice_servers,
            max_sessions: defaults.max_sessions,
            session_timeout_secs: defaults.session_timeout.as_secs(),
            cleanup_interval_secs: defaults.cleanup_interval.as_secs(),
            negotiation_timeout_ms: defaults.negotiation_timeout.as_millis() as u64,
            connect_timeout_secs: defaults.connect_timeout.as_secs(),
            max_message_size: defaults.max_message_size,
            analysis_interval_ms: defaults.analysis_interval.as_millis() as u64,
            video_codec: defaults.video_codec,
        }
    }
}

impl WebRtcSection {
    /// Build the session manager config, applying `WEBRTC_*` overrides
    pub fn to_webrtc_config(&self) -> WebRtcConfig {
        WebRtcConfig {
            ice_servers: self.ice_servers.clone(),
            max_sessions: self.max_sessions,
            session_timeout: Duration::from_secs(self.session_timeout_secs),
            cleanup_interval: Duration::from_secs(self.cleanup_interval_secs),
            negotiation_timeout: Duration::from_millis(self.negotiation_timeout_ms),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            max_message_size: self.max_message_size,
            analysis_interval: Duration::from_millis(self.analysis_interval_ms),
            video_codec: self.video_codec.clone(),
        }
        .with_env_overrides()
    }
}

/// Media source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub device: DeviceKind,
    pub synthetic: SyntheticConfig,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            device: DeviceKind::Synthetic,
            synthetic: SyntheticConfig::default(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "visionrtc_server=debug,visionrtc_webrtc=debug,tower_http=debug".to_string(),
            json: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from CLI args and optional config file.
    ///
    /// A missing config file is not an error; an unreadable or invalid one is.
    pub fn load(args: &CliArgs) -> Result<Self> {
        let mut config = if args.config.exists() {
            Self::from_file(&args.config)
                .with_context(|| format!("Failed to load config from {:?}", args.config))?
        } else {
            Self::default()
        };

        if let Some(ref host) = args.host {
            config.http.host = host.clone();
        }
        if let Some(port) = args.port {
            config.http.port = port;
        }
        if let Some(ref level) = args.log_level {
            config.logging.level = level.clone();
        }
        if args.log_json {
            config.logging.json = true;
        }
        if let Some(device) = args.device {
            config.media.device = device;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: ServerConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Check every section, including the derived WebRTC config
    pub fn validate(&self) -> Result<()> {
        if self.http.channel_capacity == 0 {
            anyhow::bail!("http.channel_capacity must be > 0");
        }
        if self.media.synthetic.fps == 0 {
            anyhow::bail!("media.synthetic.fps must be > 0");
        }
        self.webrtc
            .to_webrtc_config()
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid webrtc config: {}", e))
    }

    /// Socket address to bind
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.http.host, self.http.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.http.host, self.http.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args(config: PathBuf) -> CliArgs {
        CliArgs {
            host: None,
            port: None,
            config,
            log_level: None,
            log_json: false,
            device: None,
        }
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.media.device, DeviceKind::Synthetic);

        let webrtc = config.webrtc.to_webrtc_config();
        assert_eq!(webrtc.ice_servers.len(), 2);
        assert_eq!(webrtc.connect_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cli_args_override() {
        let mut cli = args(PathBuf::from("nonexistent.toml"));
        cli.host = Some("127.0.0.1".to_string());
        cli.port = Some(9000);
        cli.log_json = true;
        cli.device = Some(DeviceKind::None);

        let config = ServerConfig::load(&cli).unwrap();
        assert_eq!(config.http.port, 9000);
        assert!(config.logging.json);
        assert_eq!(config.media.device, DeviceKind::None);
        assert_eq!(config.bind_addr().unwrap(), "127.0.0.1:9000".parse().unwrap());
    }

    #[test]
    fn test_partial_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[http]
port = 7000

[webrtc]
max_sessions = 4
connect_timeout_secs = 5
ice_servers = [{{ urls = ["turn:turn.example.org:3478"], username = "u", credential = "p" }}]

[media.synthetic]
width = 64
height = 48
"#
        )
        .unwrap();

        let config = ServerConfig::load(&args(file.path().to_path_buf())).unwrap();
        assert_eq!(config.http.port, 7000);
        assert_eq!(config.http.host, "0.0.0.0");
        assert_eq!(config.webrtc.max_sessions, 4);
        assert_eq!(config.media.synthetic.width, 64);
        assert_eq!(config.media.synthetic.fps, SyntheticConfig::default().fps);

        let webrtc = config.webrtc.to_webrtc_config();
        assert_eq!(webrtc.connect_timeout, Duration::from_secs(5));
        assert_eq!(webrtc.ice_servers[0].username.as_deref(), Some("u"));
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[http\nport = ").unwrap();

        let err = ServerConfig::load(&args(file.path().to_path_buf())).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));
    }

    #[test]
    fn test_invalid_webrtc_section_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[webrtc]\nmax_sessions = 0").unwrap();

        let err = ServerConfig::load(&args(file.path().to_path_buf())).unwrap_err();
        assert!(err.to_string().contains("max_sessions"));
    }
}
