//! Transport seam
//!
//! A [`PeerTransport`] is the media transport behind one peer session. The
//! production implementation wraps a `webrtc` crate peer connection
//! ([`RtcTransport`](crate::RtcTransport)); tests plug in mocks.
//!
//! Transports never call back into the session. Whatever they observe
//! (local candidates, connectivity changes, remote frames) is pushed as a
//! [`SessionEvent`] onto the owning connection's event queue.

use crate::{error::WebRtcResult, types::IceCandidate};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use visionrtc_media::{TrackKind, VideoFrame};

/// Sending half of a connection's event queue
pub type SessionEventSender = mpsc::UnboundedSender<SessionEvent>;

/// Receiving half of a connection's event queue
pub type SessionEventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Transport-level connectivity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    /// Nothing happened yet
    New,
    /// ICE/DTLS in progress
    Connecting,
    /// Media can flow
    Connected,
    /// Temporarily lost; may recover
    Disconnected,
    /// Gave up
    Failed,
    /// Closed by either side
    Closed,
}

impl Connectivity {
    /// Whether the transport can no longer carry media
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

/// Something a transport observed, tagged with the session it belongs to
#[derive(Debug, Clone)]
pub struct SessionEvent {
    /// Session that owns the transport
    pub session_id: String,
    /// What happened
    pub kind: SessionEventKind,
}

/// Event payload
#[derive(Debug, Clone)]
pub enum SessionEventKind {
    /// A local candidate was gathered and must be sent to the client
    LocalCandidate(IceCandidate),
    /// Connectivity changed
    Connectivity(Connectivity),
    /// A frame arrived on the client's media track
    RemoteFrame(VideoFrame),
}

impl SessionEvent {
    /// Build an event
    pub fn new(session_id: impl Into<String>, kind: SessionEventKind) -> Self {
        Self {
            session_id: session_id.into(),
            kind,
        }
    }
}

/// Writable side of an attached outbound track
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Send one frame to the remote peer
    async fn write_frame(&self, frame: &VideoFrame) -> WebRtcResult<()>;
}

/// Media transport for one peer session
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Apply the client's offer
    async fn set_remote_description(&self, sdp: &str) -> WebRtcResult<()>;

    /// Add an outbound track and return its sink
    async fn attach_track(&self, kind: TrackKind, track_id: &str) -> WebRtcResult<Arc<dyn FrameSink>>;

    /// Produce an answer for the applied offer
    async fn create_answer(&self) -> WebRtcResult<String>;

    /// Commit our answer
    async fn set_local_description(&self, sdp: &str) -> WebRtcResult<()>;

    /// Apply a remote candidate
    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> WebRtcResult<()>;

    /// Tear the transport down
    async fn close(&self) -> WebRtcResult<()>;
}

/// Creates one transport per session
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Create a transport whose events are tagged with `session_id`
    async fn create(
        &self,
        session_id: &str,
        events: SessionEventSender,
    ) -> WebRtcResult<Arc<dyn PeerTransport>>;
}
