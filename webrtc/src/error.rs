//! Error types for signaling and session operations
//!
//! Every error carries an [`ErrorKind`], which is what the client sees on the
//! wire (`{"error": "<kind>", "detail": "..."}`).

use serde::{Deserialize, Serialize};
use visionrtc_media::MediaError;

/// Result type for signaling operations
pub type WebRtcResult<T> = Result<T, WebRtcError>;

/// Wire-level error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Inbound message could not be parsed
    MalformedMessage,
    /// Offer is not usable SDP or the transport rejected it
    InvalidOffer,
    /// Candidate could not be parsed or applied
    InvalidCandidate,
    /// Operation not allowed in the session's current state
    InvalidState,
    /// A negotiation step did not finish in time
    NegotiationTimeout,
    /// The transport reported a fatal connectivity failure
    TransportFailed,
    /// Capture device could not be acquired
    DeviceUnavailable,
    /// Frame pulled from a closed track
    TrackClosed,
    /// Too many concurrent sessions
    SessionLimitReached,
    /// Anything else
    Internal,
}

impl ErrorKind {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedMessage => "MalformedMessage",
            Self::InvalidOffer => "InvalidOffer",
            Self::InvalidCandidate => "InvalidCandidate",
            Self::InvalidState => "InvalidState",
            Self::NegotiationTimeout => "NegotiationTimeout",
            Self::TransportFailed => "TransportFailed",
            Self::DeviceUnavailable => "DeviceUnavailable",
            Self::TrackClosed => "TrackClosed",
            Self::SessionLimitReached => "SessionLimitReached",
            Self::Internal => "Internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while signaling or running a session
#[derive(Debug, Clone, thiserror::Error)]
pub enum WebRtcError {
    /// Inbound message rejected before dispatch
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Offer rejected by validation or by the transport
    #[error("Invalid offer: {0}")]
    InvalidOffer(String),

    /// Candidate rejected
    #[error("Invalid candidate: {0}")]
    InvalidCandidate(String),

    /// Operation not allowed in current session state
    #[error("Invalid state [{session_id}]: expected {expected}, got {actual}")]
    InvalidState {
        /// Session the operation targeted (empty if none)
        session_id: String,
        /// State(s) the operation requires
        expected: String,
        /// State the session is actually in
        actual: String,
    },

    /// A bounded step ran out of time
    #[error("Negotiation timed out: {0}")]
    NegotiationTimeout(String),

    /// Transport is unusable
    #[error("Transport failed: {0}")]
    TransportFailed(String),

    /// Capture device could not be acquired
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Track already closed
    #[error("Track closed: {0}")]
    TrackClosed(String),

    /// Session limit reached
    #[error("Session limit reached: {current}/{max}")]
    SessionLimitReached {
        /// Sessions currently registered
        current: usize,
        /// Configured maximum
        max: usize,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl WebRtcError {
    /// Wire-level classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedMessage(_) => ErrorKind::MalformedMessage,
            Self::InvalidOffer(_) => ErrorKind::InvalidOffer,
            Self::InvalidCandidate(_) => ErrorKind::InvalidCandidate,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::NegotiationTimeout(_) => ErrorKind::NegotiationTimeout,
            Self::TransportFailed(_) => ErrorKind::TransportFailed,
            Self::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            Self::TrackClosed(_) => ErrorKind::TrackClosed,
            Self::SessionLimitReached { .. } => ErrorKind::SessionLimitReached,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the session that produced this error must be torn down
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidOffer(_) | Self::NegotiationTimeout(_) | Self::TransportFailed(_)
        )
    }

    /// Human-readable detail for the wire, without the kind prefix
    pub fn detail(&self) -> String {
        match self {
            Self::MalformedMessage(msg)
            | Self::InvalidOffer(msg)
            | Self::InvalidCandidate(msg)
            | Self::NegotiationTimeout(msg)
            | Self::TransportFailed(msg)
            | Self::DeviceUnavailable(msg)
            | Self::TrackClosed(msg)
            | Self::Internal(msg) => msg.clone(),
            Self::InvalidState {
                session_id,
                expected,
                actual,
            } => {
                if session_id.is_empty() {
                    format!("expected {}, got {}", expected, actual)
                } else {
                    format!(
                        "session {} is in state '{}', expected '{}'",
                        session_id, actual, expected
                    )
                }
            }
            Self::SessionLimitReached { current, max } => {
                format!("session limit reached: {}/{}", current, max)
            }
        }
    }
}

impl From<serde_json::Error> for WebRtcError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedMessage(format!("invalid JSON: {}", err))
    }
}

impl From<MediaError> for WebRtcError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::DeviceUnavailable(msg) => Self::DeviceUnavailable(msg),
            MediaError::TrackClosed(id) => Self::TrackClosed(id),
            other => Self::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_names() {
        let json = serde_json::to_string(&ErrorKind::SessionLimitReached).unwrap();
        assert_eq!(json, "\"SessionLimitReached\"");
        assert_eq!(ErrorKind::MalformedMessage.to_string(), "MalformedMessage");
    }

    #[test]
    fn test_session_fatal_classification() {
        assert!(WebRtcError::InvalidOffer("x".into()).is_session_fatal());
        assert!(WebRtcError::TransportFailed("x".into()).is_session_fatal());
        assert!(!WebRtcError::InvalidCandidate("x".into()).is_session_fatal());
        assert!(!WebRtcError::DeviceUnavailable("x".into()).is_session_fatal());
    }

    #[test]
    fn test_media_error_conversion() {
        let err: WebRtcError = MediaError::DeviceUnavailable("no camera".into()).into();
        assert_eq!(err.kind(), ErrorKind::DeviceUnavailable);
        assert_eq!(err.detail(), "no camera");
    }

    #[test]
    fn test_invalid_state_detail() {
        let err = WebRtcError::InvalidState {
            session_id: String::new(),
            expected: "an offer".into(),
            actual: "answer".into(),
        };
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(err.detail(), "expected an offer, got answer");
    }
}
