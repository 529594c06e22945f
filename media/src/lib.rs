//! VisionRTC Media Crate
//!
//! Server-side media sources for VisionRTC sessions.
//!
//! # Architecture
//!
//! - [`DeviceProvider`] / [`FrameDevice`]: capture device seam
//! - [`SyntheticSource`]: test-pattern generator used when no camera exists
//! - [`MediaSourceTrack`]: exclusive, lazily-pulled frame sequence attached to
//!   one peer session
//! - [`FrameAnalyzer`]: optional, fail-open frame description
//!
//! # Usage
//!
//! ```rust,no_run
//! use visionrtc_media::{MediaSourceTrack, NextFrame, SyntheticConfig, SyntheticSource};
//!
//! #[tokio::main]
//! async fn main() {
//!     let source = SyntheticSource::new(SyntheticConfig::default());
//!     let mut track = MediaSourceTrack::open_or_empty(&source).await;
//!
//!     if let Ok(NextFrame::Frame(frame)) = track.next_frame() {
//!         println!("frame #{} ({} bytes)", frame.sequence, frame.len());
//!     }
//!     track.close();
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod analyzer;
mod device;
mod error;
mod frame;
mod synthetic;
mod track;

// Re-exports
pub use analyzer::{analyze_fail_open, FrameAnalyzer, FrameStatsAnalyzer, NoopAnalyzer};
pub use device::{DeviceProvider, DeviceRead, FrameDevice, UnavailableDevice};
pub use error::{MediaError, MediaResult};
pub use frame::{TrackKind, VideoFrame};
pub use synthetic::{SyntheticConfig, SyntheticSource};
pub use track::{MediaSourceTrack, NextFrame};
