//! Type definitions shared across the signaling core

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one client connection
///
/// Minted by the hub when a connection is accepted; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Mint a fresh identity
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for ClientId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// ICE candidate for WebRTC connection
///
/// Field names follow the browser's `RTCIceCandidateInit` JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IceCandidate {
    /// Candidate string (SDP `a=candidate` value, without the prefix)
    pub candidate: String,

    /// SDP media stream ID
    #[serde(default)]
    pub sdp_mid: Option<String>,

    /// SDP media stream index
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,

    /// ICE username fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Candidate with only the candidate line set
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }

    /// Set the media stream ID and index
    pub fn with_mid(mut self, sdp_mid: impl Into<String>, sdp_mline_index: u16) -> Self {
        self.sdp_mid = Some(sdp_mid.into());
        self.sdp_mline_index = Some(sdp_mline_index);
        self
    }

    /// Whether this is the end-of-candidates marker (empty candidate line)
    pub fn is_end_of_candidates(&self) -> bool {
        self.candidate.trim().is_empty()
    }
}

/// Session information for status queries
///
/// Lightweight snapshot of a peer session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session ID
    pub id: String,

    /// Client that owns this session
    pub client_id: ClientId,

    /// Current session state
    pub state: String,

    /// When the session was created
    pub created_at: DateTime<Utc>,

    /// Last activity timestamp
    pub last_activity: DateTime<Utc>,

    /// Whether the client's offer has been applied
    pub has_remote_description: bool,

    /// Whether our answer has been committed
    pub has_local_description: bool,

    /// Candidates waiting for the remote description
    pub pending_candidates: usize,

    /// Candidates handed to the transport
    pub applied_candidates: usize,

    /// Candidates the transport refused
    pub rejected_candidates: usize,

    /// Attached media track, if one was opened
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_id: Option<String>,
}

/// Statistics for the session manager
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebRtcStats {
    /// Total sessions created
    pub total_sessions: usize,

    /// Currently registered sessions
    pub active_sessions: usize,

    /// Sessions that reached live connectivity
    pub connected_sessions: usize,

    /// Sessions that ended in `Failed`
    pub failed_sessions: usize,

    /// Sessions replaced by a newer offer
    pub replaced_sessions: usize,

    /// Sessions removed by the cleanup task
    pub sessions_cleaned: usize,

    /// Answers produced
    pub answers_created: u64,

    /// Candidates that had to wait for the remote description
    pub candidates_buffered: u64,

    /// Candidates handed to a transport
    pub candidates_applied: u64,

    /// Inbound messages received
    pub messages_received: u64,

    /// Inbound messages rejected as malformed
    pub malformed_messages: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_browser_shape() {
        let json = r#"{"candidate":"candidate:1 1 udp 2122260223 10.0.0.2 54400 typ host","sdpMid":"0","sdpMLineIndex":0}"#;
        let candidate: IceCandidate = serde_json::from_str(json).unwrap();
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_mline_index, Some(0));
        assert_eq!(candidate.username_fragment, None);

        let back = serde_json::to_value(&candidate).unwrap();
        assert_eq!(back["sdpMLineIndex"], 0);
        assert!(back.get("usernameFragment").is_none());
    }

    #[test]
    fn test_candidate_rejects_unknown_fields() {
        let json = r#"{"candidate":"x","sdpMid":null,"sdpMLineIndex":null,"extra":1}"#;
        assert!(serde_json::from_str::<IceCandidate>(json).is_err());
    }

    #[test]
    fn test_client_ids_are_unique() {
        assert_ne!(ClientId::new(), ClientId::new());
    }
}
