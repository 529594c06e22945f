//! VisionRTC WebRTC Crate
//!
//! Signaling and peer session lifecycle for VisionRTC.
//!
//! # Architecture
//!
//! - [`SignalingHub`]: terminates client connections, parses messages and
//!   answers only the client that asked
//! - [`PeerSessionManager`]: at most one [`PeerSession`] per client
//! - [`PeerSession`]: offer/answer state machine owning a transport and a
//!   media track
//! - [`CandidateRelay`]: holds candidates that arrive before the offer
//! - [`PeerTransport`]: seam over the `webrtc` crate ([`RtcTransport`])
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//! use visionrtc_media::{FrameStatsAnalyzer, SyntheticConfig, SyntheticSource};
//! use visionrtc_webrtc::{PeerSessionManager, RtcTransportFactory, SignalingHub, WebRtcConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Arc::new(WebRtcConfig::default());
//!     let manager = Arc::new(PeerSessionManager::new(
//!         config.clone(),
//!         Arc::new(RtcTransportFactory::new(config)),
//!         Arc::new(SyntheticSource::new(SyntheticConfig::default())),
//!     ));
//!     let hub = SignalingHub::new(manager, Arc::new(FrameStatsAnalyzer));
//!
//!     // One pair of channels per accepted socket
//!     let (outbound_tx, _outbound_rx) = mpsc::channel(64);
//!     let (_inbound_tx, inbound_rx) = mpsc::channel(64);
//!     let conn = hub.on_connect(outbound_tx);
//!     hub.drive(conn, inbound_rx).await;
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod config;
mod error;
mod hub;
mod manager;
mod peer_connection;
mod protocol;
mod relay;
mod sdp;
mod session;
mod transport;
mod types;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

// Re-exports
pub use config::{IceServerConfig, VideoCodecConfig, WebRtcConfig};
pub use error::{ErrorKind, WebRtcError, WebRtcResult};
pub use hub::{ClientConnection, SignalingHub};
pub use manager::{PeerSessionManager, SessionHandle};
pub use peer_connection::{RtcTransport, RtcTransportFactory};
pub use protocol::{ClientMessage, ServerMessage};
pub use relay::{CandidateRelay, Relayed};
pub use sdp::{ensure_media_section, media_kinds, validate_offer, MediaKind, SdpSummary};
pub use session::{CandidateOutcome, PeerSession, SessionState};
pub use transport::{
    Connectivity, FrameSink, PeerTransport, SessionEvent, SessionEventKind,
    SessionEventReceiver, SessionEventSender, TransportFactory,
};
pub use types::{ClientId, IceCandidate, SessionInfo, WebRtcStats};
