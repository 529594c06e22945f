//! Frame and track kind definitions

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    /// Video frames
    Video,
    /// Audio frames
    Audio,
}

impl TrackKind {
    /// SDP media name (`m=<kind>`)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single media frame
///
/// `payload` is opaque to the signaling layer: for a capture device it is
/// whatever the device hands out (usually an encoded sample), for frames
/// reassembled from a remote track it is the concatenated RTP payload.
/// `width`/`height` are zero when the producer does not know them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    /// Monotonic frame counter within its track
    pub sequence: u64,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Frame bytes
    pub payload: Bytes,
    /// Presentation duration
    pub duration: Duration,
}

impl VideoFrame {
    /// Create a frame
    pub fn new(sequence: u64, width: u32, height: u32, payload: Bytes, duration: Duration) -> Self {
        Self {
            sequence,
            width,
            height,
            payload,
            duration,
        }
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Mean byte value of the payload, `None` for an empty payload
    pub fn mean_intensity(&self) -> Option<f64> {
        if self.payload.is_empty() {
            return None;
        }
        let sum: u64 = self.payload.iter().map(|b| u64::from(*b)).sum();
        Some(sum as f64 / self.payload.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_intensity() {
        let frame = VideoFrame::new(0, 2, 1, Bytes::from_static(&[0, 100]), Duration::ZERO);
        assert_eq!(frame.mean_intensity(), Some(50.0));

        let empty = VideoFrame::new(1, 0, 0, Bytes::new(), Duration::ZERO);
        assert!(empty.is_empty());
        assert_eq!(empty.mean_intensity(), None);
    }

    #[test]
    fn test_track_kind_names() {
        assert_eq!(TrackKind::Video.as_str(), "video");
        assert_eq!(TrackKind::Audio.to_string(), "audio");
    }
}
