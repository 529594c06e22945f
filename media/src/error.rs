//! Error types for media sources

use thiserror::Error;

/// Result type for media operations
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors raised by capture devices and media source tracks
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    /// The capture device could not be acquired
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A frame was requested from a track that was already closed
    #[error("Track {0} is closed")]
    TrackClosed(String),

    /// The device failed while reading a frame
    #[error("Device error: {0}")]
    Device(String),

    /// Frame analysis failed
    #[error("Analysis failed: {0}")]
    Analysis(String),
}
