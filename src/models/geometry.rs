use nalgebra::{Matrix4, Vector3, Vector4};
use serde::{Deserialize, Serialize};

/// A 4x4 rigid transform from world to camera coordinates.
///
/// Serialized row-major as a nested list, which is the layout subscribers
/// already consume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[[f64; 4]; 4]", into = "[[f64; 4]; 4]")]
pub struct Pose(pub Matrix4<f64>);

impl Pose {
    pub fn identity() -> Self {
        Self(Matrix4::identity())
    }

    /// Apply the transform to a world point, returning camera-space coordinates.
    pub fn transform_point(&self, point: &Point3) -> Vector3<f64> {
        let camera = self.0 * Vector4::new(point.x, point.y, point.z, 1.0);
        camera.xyz()
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

impl From<[[f64; 4]; 4]> for Pose {
    fn from(rows: [[f64; 4]; 4]) -> Self {
        Self(Matrix4::from_fn(|r, c| rows[r][c]))
    }
}

impl From<Pose> for [[f64; 4]; 4] {
    fn from(pose: Pose) -> Self {
        let mut rows = [[0.0; 4]; 4];
        for (r, row) in rows.iter_mut().enumerate() {
            for (c, value) in row.iter_mut().enumerate() {
                *value = pose.0[(r, c)];
            }
        }
        rows
    }
}

/// A 3-D point in the shared world frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Coordinates rounded to millimetre precision (3 decimal places), as
    /// integer thousandths so the key is hashable.
    ///
    /// `None` when a coordinate is non-finite or its thousandths do not fit
    /// in an `i64`.
    pub fn rounded_key(&self) -> Option<(i64, i64, i64)> {
        let round = |v: f64| {
            let scaled = (v * 1000.0).round();
            (scaled.abs() < i64::MAX as f64).then_some(scaled as i64)
        };
        Some((round(self.x)?, round(self.y)?, round(self.z)?))
    }
}

/// A 2-D point in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// One accepted camera pose along the trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryEntry {
    pub frame: u64,
    pub pose: Pose,
}
