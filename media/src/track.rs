//! Media source track
//!
//! A [`MediaSourceTrack`] owns exactly one device handle for its whole open
//! lifetime. It is deliberately not `Clone`: a track belongs to one session.

use crate::{
    device::{DeviceProvider, DeviceRead, FrameDevice},
    error::{MediaError, MediaResult},
    frame::{TrackKind, VideoFrame},
};
use std::time::Duration;
use uuid::Uuid;

const EMPTY_TRACK_INTERVAL: Duration = Duration::from_millis(33);

/// Result of pulling from a track
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextFrame {
    /// A frame is available
    Frame(VideoFrame),
    /// No frame this tick (device busy); the stream continues
    Unavailable,
    /// The stream is finished
    EndOfStream,
}

enum TrackSource {
    Device(Box<dyn FrameDevice>),
    Empty,
    Closed,
}

/// A lazily-pulled sequence of frames from a capture device or generator
pub struct MediaSourceTrack {
    id: String,
    kind: TrackKind,
    source: TrackSource,
    interval: Duration,
    frames_produced: u64,
}

impl MediaSourceTrack {
    /// Open a track on a freshly acquired device handle
    ///
    /// # Errors
    /// Returns `MediaError::DeviceUnavailable` when the device cannot be acquired.
    pub async fn open(provider: &dyn DeviceProvider) -> MediaResult<Self> {
        let device = provider.acquire().await?;
        let interval = device.frame_interval();
        let id = format!("{}-{}", provider.kind(), Uuid::new_v4());

        tracing::info!(track_id = %id, device = %device.label(), "Opened media source track");

        Ok(Self {
            id,
            kind: provider.kind(),
            source: TrackSource::Device(device),
            interval,
            frames_produced: 0,
        })
    }

    /// Open a track, degrading to an empty track if the device is unavailable
    pub async fn open_or_empty(provider: &dyn DeviceProvider) -> Self {
        match Self::open(provider).await {
            Ok(track) => track,
            Err(e) => {
                tracing::warn!(error = %e, "Media device unavailable, using empty track");
                Self::empty(provider.kind())
            }
        }
    }

    /// A track that ends immediately
    pub fn empty(kind: TrackKind) -> Self {
        Self {
            id: format!("{}-empty-{}", kind, Uuid::new_v4()),
            kind,
            source: TrackSource::Empty,
            interval: EMPTY_TRACK_INTERVAL,
            frames_produced: 0,
        }
    }

    /// Track identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Media kind
    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Interval at which frames should be pulled
    pub fn frame_interval(&self) -> Duration {
        self.interval
    }

    /// Number of frames handed out so far
    pub fn frames_produced(&self) -> u64 {
        self.frames_produced
    }

    /// Whether this is the no-op fallback track
    pub fn is_empty_track(&self) -> bool {
        matches!(self.source, TrackSource::Empty)
    }

    /// Whether the track was closed
    pub fn is_closed(&self) -> bool {
        matches!(self.source, TrackSource::Closed)
    }

    /// Pull the next frame
    ///
    /// # Errors
    /// Returns `MediaError::TrackClosed` after [`close`](Self::close), and
    /// propagates device read failures other than "busy".
    pub fn next_frame(&mut self) -> MediaResult<NextFrame> {
        let device = match &mut self.source {
            TrackSource::Device(device) => device,
            TrackSource::Empty => return Ok(NextFrame::EndOfStream),
            TrackSource::Closed => return Err(MediaError::TrackClosed(self.id.clone())),
        };

        match device.read_frame()? {
            DeviceRead::Frame(frame) => {
                self.frames_produced += 1;
                Ok(NextFrame::Frame(frame))
            }
            DeviceRead::Busy => Ok(NextFrame::Unavailable),
            DeviceRead::EndOfStream => Ok(NextFrame::EndOfStream),
        }
    }

    /// Release the device handle
    ///
    /// Returns `true` the first time, `false` if the track was already closed.
    pub fn close(&mut self) -> bool {
        match std::mem::replace(&mut self.source, TrackSource::Closed) {
            TrackSource::Device(mut device) => {
                device.release();
                tracing::info!(
                    track_id = %self.id,
                    frames = self.frames_produced,
                    "Closed media source track"
                );
                true
            }
            TrackSource::Empty => true,
            TrackSource::Closed => false,
        }
    }
}

impl Drop for MediaSourceTrack {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for MediaSourceTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSourceTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("empty", &self.is_empty_track())
            .field("closed", &self.is_closed())
            .field("frames_produced", &self.frames_produced)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::UnavailableDevice;
    use crate::synthetic::{SyntheticConfig, SyntheticSource};

    #[tokio::test]
    async fn test_open_and_pull_frames() {
        let source = SyntheticSource::new(SyntheticConfig::default());
        let mut track = MediaSourceTrack::open(&source).await.unwrap();

        assert!(matches!(track.next_frame().unwrap(), NextFrame::Frame(_)));
        assert_eq!(track.frames_produced(), 1);
        assert_eq!(source.handles_in_use(), 1);
    }

    #[tokio::test]
    async fn test_next_frame_after_close_fails() {
        let source = SyntheticSource::new(SyntheticConfig::default());
        let mut track = MediaSourceTrack::open(&source).await.unwrap();

        assert!(track.close());
        assert!(!track.close());
        assert_eq!(source.released(), 1);
        assert!(matches!(track.next_frame(), Err(MediaError::TrackClosed(_))));
    }

    #[tokio::test]
    async fn test_drop_releases_handle() {
        let source = SyntheticSource::new(SyntheticConfig::default());
        {
            let _track = MediaSourceTrack::open(&source).await.unwrap();
            assert_eq!(source.handles_in_use(), 1);
        }
        assert_eq!(source.handles_in_use(), 0);
        assert_eq!(source.released(), 1);
    }

    #[tokio::test]
    async fn test_busy_device_is_not_end_of_stream() {
        let source = SyntheticSource::new(SyntheticConfig {
            busy_every: Some(1),
            ..Default::default()
        });
        let mut track = MediaSourceTrack::open(&source).await.unwrap();

        assert_eq!(track.next_frame().unwrap(), NextFrame::Unavailable);
        assert_eq!(track.next_frame().unwrap(), NextFrame::Unavailable);
        assert!(!track.is_closed());
    }

    #[tokio::test]
    async fn test_unavailable_device_falls_back_to_empty_track() {
        let provider = UnavailableDevice::new("camera unplugged");

        let err = MediaSourceTrack::open(&provider).await.unwrap_err();
        assert!(matches!(err, MediaError::DeviceUnavailable(_)));

        let mut track = MediaSourceTrack::open_or_empty(&provider).await;
        assert!(track.is_empty_track());
        assert_eq!(track.next_frame().unwrap(), NextFrame::EndOfStream);
    }
}
