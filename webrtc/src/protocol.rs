//! Signaling wire protocol
//!
//! One JSON object per frame, carrying exactly one tag:
//!
//! ```text
//! client -> server   {"offer": "<sdp>"} | {"candidate": {...}} | {"close": ...} | "close"
//! server -> client   {"answer": "<sdp>"} | {"candidate": {...}}
//!                    {"error": "<kind>", "detail": "..."} | {"response": "..."}
//! ```

use crate::{
    error::{ErrorKind, WebRtcError, WebRtcResult},
    types::IceCandidate,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const TAGS: &str = "offer, answer, candidate, close";

/// Inbound signaling message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Remote session description offer
    Offer(String),
    /// Remote answer (never valid: the server is always the answering peer)
    Answer(String),
    /// Trickled connectivity candidate
    Candidate(IceCandidate),
    /// Client is done with its session
    Close,
}

impl ClientMessage {
    /// Parse raw frame bytes
    ///
    /// # Errors
    /// Returns `WebRtcError::MalformedMessage` for anything that is not
    /// exactly one known tag with a well-formed payload.
    pub fn parse(raw: &[u8]) -> WebRtcResult<Self> {
        let value: Value = serde_json::from_slice(raw)?;

        let map = match value {
            Value::String(ref s) if s == "close" => return Ok(Self::Close),
            Value::Object(map) => map,
            other => {
                return Err(WebRtcError::MalformedMessage(format!(
                    "expected a JSON object, got {}",
                    json_type(&other)
                )))
            }
        };

        if map.len() != 1 {
            return Err(WebRtcError::MalformedMessage(format!(
                "expected exactly one of {}, got {} fields",
                TAGS,
                map.len()
            )));
        }

        let Some((tag, payload)) = map.into_iter().next() else {
            return Err(WebRtcError::MalformedMessage("empty message".to_string()));
        };

        match tag.as_str() {
            "offer" => description(payload, "offer").map(Self::Offer),
            "answer" => description(payload, "answer").map(Self::Answer),
            "candidate" => candidate(payload).map(Self::Candidate),
            "close" => Ok(Self::Close),
            other => Err(WebRtcError::MalformedMessage(format!(
                "unknown message tag '{}', expected one of {}",
                other, TAGS
            ))),
        }
    }

    /// Tag name, for logging
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::Candidate(_) => "candidate",
            Self::Close => "close",
        }
    }
}

/// Description payload: a bare SDP string or `{"sdp": "...", "type": "<expected>"}`
fn description(payload: Value, expected_type: &str) -> WebRtcResult<String> {
    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Described {
        sdp: String,
        #[serde(rename = "type")]
        kind: Option<String>,
    }

    match payload {
        Value::String(sdp) => Ok(sdp),
        Value::Object(_) => {
            let described: Described = serde_json::from_value(payload).map_err(|e| {
                WebRtcError::MalformedMessage(format!("invalid {} payload: {}", expected_type, e))
            })?;
            match described.kind.as_deref() {
                None => Ok(described.sdp),
                Some(kind) if kind == expected_type => Ok(described.sdp),
                Some(kind) => Err(WebRtcError::MalformedMessage(format!(
                    "{} payload has type '{}'",
                    expected_type, kind
                ))),
            }
        }
        other => Err(WebRtcError::MalformedMessage(format!(
            "{} must be an SDP string, got {}",
            expected_type,
            json_type(&other)
        ))),
    }
}

/// `null` is the browser's end-of-candidates marker
fn candidate(payload: Value) -> WebRtcResult<IceCandidate> {
    if payload.is_null() {
        return Ok(IceCandidate::new(""));
    }
    serde_json::from_value(payload)
        .map_err(|e| WebRtcError::MalformedMessage(format!("invalid candidate payload: {}", e)))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Outbound signaling message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// Local description answering the client's offer
    Answer {
        /// Answer SDP
        answer: String,
    },
    /// Locally gathered connectivity candidate
    Candidate {
        /// Candidate info
        candidate: IceCandidate,
    },
    /// Per-message or per-session failure
    Error {
        /// Error classification
        error: ErrorKind,
        /// Human-readable detail
        detail: String,
    },
    /// Frame analysis result
    Response {
        /// Analysis text
        response: String,
    },
}

impl ServerMessage {
    /// `{"answer": sdp}`
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self::Answer { answer: sdp.into() }
    }

    /// `{"candidate": {...}}`
    pub fn candidate(candidate: IceCandidate) -> Self {
        Self::Candidate { candidate }
    }

    /// `{"response": text}`
    pub fn response(text: impl Into<String>) -> Self {
        Self::Response {
            response: text.into(),
        }
    }

    /// Error kind, if this is an error message
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Error { error, .. } => Some(*error),
            _ => None,
        }
    }

    /// Serialize to a JSON text frame
    pub fn to_json(&self) -> WebRtcResult<String> {
        serde_json::to_string(self)
            .map_err(|e| WebRtcError::Internal(format!("failed to encode message: {}", e)))
    }
}

impl From<&WebRtcError> for ServerMessage {
    fn from(err: &WebRtcError) -> Self {
        Self::Error {
            error: err.kind(),
            detail: err.detail(),
        }
    }
}
