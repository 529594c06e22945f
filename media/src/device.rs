//! Capture device seam
//!
//! A [`DeviceProvider`] hands out exclusive [`FrameDevice`] handles. Real
//! camera backends and the synthetic generator both plug in here.

use crate::{
    error::{MediaError, MediaResult},
    frame::{TrackKind, VideoFrame},
};
use async_trait::async_trait;
use std::time::Duration;

/// Outcome of a single device read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceRead {
    /// A frame is ready
    Frame(VideoFrame),
    /// The device is busy; try again on the next tick
    Busy,
    /// The device has no more frames
    EndOfStream,
}

/// An acquired capture device handle
pub trait FrameDevice: Send {
    /// Human-readable device label
    fn label(&self) -> &str;

    /// Interval between frames
    fn frame_interval(&self) -> Duration;

    /// Read the next frame
    fn read_frame(&mut self) -> MediaResult<DeviceRead>;

    /// Release the underlying handle. Called exactly once by the owning track.
    fn release(&mut self);
}

/// Source of capture device handles
#[async_trait]
pub trait DeviceProvider: Send + Sync {
    /// Kind of media this provider produces
    fn kind(&self) -> TrackKind {
        TrackKind::Video
    }

    /// Acquire a device handle
    ///
    /// # Errors
    /// Returns `MediaError::DeviceUnavailable` when the device cannot be opened.
    async fn acquire(&self) -> MediaResult<Box<dyn FrameDevice>>;
}

/// Provider for hosts without a capture device
///
/// Every acquisition fails, so sessions degrade to an empty track.
#[derive(Debug, Clone, Default)]
pub struct UnavailableDevice {
    reason: String,
}

impl UnavailableDevice {
    /// Create a provider that fails with `reason`
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl DeviceProvider for UnavailableDevice {
    async fn acquire(&self) -> MediaResult<Box<dyn FrameDevice>> {
        let reason = if self.reason.is_empty() {
            "no capture device configured".to_string()
        } else {
            self.reason.clone()
        };
        Err(MediaError::DeviceUnavailable(reason))
    }
}
