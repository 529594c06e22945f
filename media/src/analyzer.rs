//! Frame analysis seam
//!
//! Analysis never affects session correctness: callers go through
//! [`analyze_fail_open`], which turns any failure into an empty result.

use crate::{error::MediaResult, frame::VideoFrame};
use async_trait::async_trait;

/// Describes a frame as text
#[async_trait]
pub trait FrameAnalyzer: Send + Sync {
    /// Analyzer name for logs
    fn name(&self) -> &'static str;

    /// Describe `frame`
    async fn analyze(&self, frame: &VideoFrame) -> MediaResult<String>;
}

/// Run `analyzer`, returning an empty string on failure
pub async fn analyze_fail_open(analyzer: &dyn FrameAnalyzer, frame: &VideoFrame) -> String {
    match analyzer.analyze(frame).await {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!(analyzer = analyzer.name(), error = %e, "Frame analysis failed");
            String::new()
        }
    }
}

/// Analyzer that never says anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAnalyzer;

#[async_trait]
impl FrameAnalyzer for NoopAnalyzer {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn analyze(&self, _frame: &VideoFrame) -> MediaResult<String> {
        Ok(String::new())
    }
}

/// Reports frame size and mean byte intensity
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameStatsAnalyzer;

#[async_trait]
impl FrameAnalyzer for FrameStatsAnalyzer {
    fn name(&self) -> &'static str {
        "frame-stats"
    }

    async fn analyze(&self, frame: &VideoFrame) -> MediaResult<String> {
        let Some(mean) = frame.mean_intensity() else {
            return Ok(String::new());
        };

        let geometry = if frame.width > 0 && frame.height > 0 {
            format!("{}x{} frame", frame.width, frame.height)
        } else {
            "encoded frame".to_string()
        };

        Ok(format!(
            "{} #{}: {} bytes, mean intensity {:.1}",
            geometry,
            frame.sequence,
            frame.len(),
            mean
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MediaError;
    use bytes::Bytes;
    use std::time::Duration;

    struct BrokenAnalyzer;

    #[async_trait]
    impl FrameAnalyzer for BrokenAnalyzer {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn analyze(&self, _frame: &VideoFrame) -> MediaResult<String> {
            Err(MediaError::Analysis("model offline".to_string()))
        }
    }

    fn frame(payload: &'static [u8]) -> VideoFrame {
        VideoFrame::new(7, 0, 0, Bytes::from_static(payload), Duration::ZERO)
    }

    #[tokio::test]
    async fn test_stats_analyzer_describes_frame() {
        let text = analyze_fail_open(&FrameStatsAnalyzer, &frame(&[10, 20, 30])).await;
        assert_eq!(text, "encoded frame #7: 3 bytes, mean intensity 20.0");
    }

    #[tokio::test]
    async fn test_failures_become_empty() {
        let text = analyze_fail_open(&BrokenAnalyzer, &frame(&[1])).await;
        assert!(text.is_empty());
    }

    #[tokio::test]
    async fn test_noop_and_empty_frames() {
        assert!(analyze_fail_open(&NoopAnalyzer, &frame(&[1, 2])).await.is_empty());
        assert!(analyze_fail_open(&FrameStatsAnalyzer, &frame(&[])).await.is_empty());
    }
}
