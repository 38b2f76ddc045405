use image::GrayImage;
use std::path::Path;

use crate::models::geometry::{Point2, Point3, Pose};

/// What the tracker reports for a frame it tracked successfully.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// World-to-camera transform of the current frame.
    pub pose: Pose,
    /// Map points tracked in the current frame, in world coordinates.
    pub points: Vec<Point3>,
    /// Native 2-D keypoints, empty when the tracker does not expose them.
    pub keypoints: Vec<Point2>,
}

/// A running visual tracker. Consumes one frame at a time.
pub trait TrackingOracle: Send {
    /// Track one frame. `Ok(None)` means tracking was lost for this frame.
    fn track(&mut self, frame: &GrayImage, timestamp: f64)
        -> Result<Option<Observation>, OracleError>;

    /// Release all native resources. Must be idempotent.
    fn shutdown(&mut self);
}

/// Creates trackers from a settings artifact.
pub trait OracleFactory: Send + Sync {
    fn init(&self, settings: &Path) -> Result<Box<dyn TrackingOracle>, OracleError>;
}

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("Tracker initialization failed: {0}")]
    Init(String),

    #[error("Tracker protocol error: {0}")]
    Protocol(String),

    #[error("Tracker has been shut down")]
    ShutDown,

    #[error("Tracker I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tracker response could not be parsed: {0}")]
    Parse(#[from] serde_json::Error),
}
