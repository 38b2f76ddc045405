use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Frame interval used when the container reports no usable frame rate (~30 fps).
pub const FALLBACK_FRAME_INTERVAL: f64 = 0.033;

/// Container-level properties of a video, read before decoding starts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Zero when the container does not report a frame count.
    pub total_frames: u64,
}

impl VideoMetadata {
    /// Seconds between consecutive frames.
    pub fn frame_interval(&self) -> f64 {
        if self.fps > 0.0 {
            1.0 / self.fps
        } else {
            FALLBACK_FRAME_INTERVAL
        }
    }
}

/// A stream of decoded grayscale frames for one video.
pub trait FrameSource: Send {
    /// Next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<GrayImage>, FrameSourceError>;

    /// Release the underlying decoder. Must be idempotent.
    fn release(&mut self);
}

/// Opens videos for probing and decoding.
pub trait VideoDecoder: Send + Sync {
    fn inspect(&self, path: &Path) -> Result<VideoMetadata, FrameSourceError>;

    fn open(
        &self,
        path: &Path,
        metadata: &VideoMetadata,
    ) -> Result<Box<dyn FrameSource>, FrameSourceError>;
}

#[derive(Debug, thiserror::Error)]
pub enum FrameSourceError {
    #[error("Video file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Cannot open video: {}: {reason}", path.display())]
    Unreadable { path: PathBuf, reason: String },

    #[error("Frame decoding failed: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
