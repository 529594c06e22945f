//! Synthetic test-pattern generator
//!
//! Produces moving vertical bars as a luma plane. Used when no camera is
//! attached and by the test suites.

use crate::{
    device::{DeviceProvider, DeviceRead, FrameDevice},
    error::{MediaError, MediaResult},
    frame::VideoFrame,
};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const BAR_COUNT: u32 = 8;

/// Settings for the synthetic source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Frames per second
    pub fps: u32,
    /// Stop after this many frames (None = infinite)
    pub frame_limit: Option<u64>,
    /// Report the device busy on every Nth read (simulates a contended camera)
    pub busy_every: Option<u64>,
    /// Maximum concurrently acquired handles (None = unlimited)
    pub max_handles: Option<usize>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            fps: 15,
            frame_limit: None,
            busy_every: None,
            max_handles: None,
        }
    }
}

impl SyntheticConfig {
    fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.fps.max(1)))
    }
}

#[derive(Debug, Default)]
struct HandleCounters {
    acquired: AtomicUsize,
    released: AtomicUsize,
}

/// Device provider generating a test pattern
#[derive(Debug, Clone, Default)]
pub struct SyntheticSource {
    config: SyntheticConfig,
    counters: Arc<HandleCounters>,
}

impl SyntheticSource {
    /// Create a synthetic source
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            counters: Arc::new(HandleCounters::default()),
        }
    }

    /// Source configuration
    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    /// Number of handles ever acquired
    pub fn acquired(&self) -> usize {
        self.counters.acquired.load(Ordering::SeqCst)
    }

    /// Number of handles released
    pub fn released(&self) -> usize {
        self.counters.released.load(Ordering::SeqCst)
    }

    /// Handles currently held by tracks
    pub fn handles_in_use(&self) -> usize {
        self.acquired().saturating_sub(self.released())
    }
}

#[async_trait]
impl DeviceProvider for SyntheticSource {
    async fn acquire(&self) -> MediaResult<Box<dyn FrameDevice>> {
        if let Some(max) = self.config.max_handles {
            if self.handles_in_use() >= max {
                return Err(MediaError::DeviceUnavailable(format!(
                    "synthetic source exhausted ({} handles in use)",
                    max
                )));
            }
        }

        let handle = self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(handle, "Acquired synthetic device handle");

        Ok(Box::new(SyntheticDevice {
            label: format!("synthetic-{}", handle),
            config: self.config.clone(),
            counters: self.counters.clone(),
            reads: 0,
            sequence: 0,
            released: false,
        }))
    }
}

struct SyntheticDevice {
    label: String,
    config: SyntheticConfig,
    counters: Arc<HandleCounters>,
    reads: u64,
    sequence: u64,
    released: bool,
}

impl SyntheticDevice {
    fn render(&self) -> Bytes {
        let width = self.config.width.max(1);
        let height = self.config.height;
        let bar_width = (width / BAR_COUNT).max(1);
        let shift = (self.sequence as u32).wrapping_mul(4);

        let row: Vec<u8> = (0..width)
            .map(|x| {
                let bar = (x.wrapping_add(shift) / bar_width) % BAR_COUNT;
                (bar * (255 / (BAR_COUNT - 1))) as u8
            })
            .collect();

        let mut plane = Vec::with_capacity(row.len() * height as usize);
        for _ in 0..height {
            plane.extend_from_slice(&row);
        }
        Bytes::from(plane)
    }
}

impl FrameDevice for SyntheticDevice {
    fn label(&self) -> &str {
        &self.label
    }

    fn frame_interval(&self) -> Duration {
        self.config.frame_interval()
    }

    fn read_frame(&mut self) -> MediaResult<DeviceRead> {
        if self.released {
            return Err(MediaError::Device(format!("{} already released", self.label)));
        }

        self.reads += 1;
        if let Some(every) = self.config.busy_every {
            if every > 0 && self.reads % every == 0 {
                return Ok(DeviceRead::Busy);
            }
        }

        if let Some(limit) = self.config.frame_limit {
            if self.sequence >= limit {
                return Ok(DeviceRead::EndOfStream);
            }
        }

        let frame = VideoFrame::new(
            self.sequence,
            self.config.width,
            self.config.height,
            self.render(),
            self.config.frame_interval(),
        );
        self.sequence += 1;
        Ok(DeviceRead::Frame(frame))
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.counters.released.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(device = %self.label, "Released synthetic device handle");
        }
    }
}
