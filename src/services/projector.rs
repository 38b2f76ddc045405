use crate::models::geometry::{Point2, Point3, Pose};

/// Points at or closer than this camera-space depth are not projected.
pub const MIN_DEPTH: f64 = 0.01;

/// Pinhole intrinsics of the (synthesized) tracking camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub width: u32,
    pub height: u32,
}

/// Project world points into the image plane of a camera at `pose`.
///
/// Best effort: points behind the camera or outside the image are dropped,
/// survivors keep their input order. A non-finite pose yields nothing.
pub fn project_points(points: &[Point3], pose: &Pose, camera: &CameraIntrinsics) -> Vec<Point2> {
    if points.is_empty() || !pose.is_finite() {
        return Vec::new();
    }

    let width = f64::from(camera.width);
    let height = f64::from(camera.height);

    points
        .iter()
        .filter_map(|point| {
            if !point.is_finite() {
                return None;
            }
            let cam = pose.transform_point(point);
            if cam.z.is_nan() || cam.z <= MIN_DEPTH {
                return None;
            }
            let x = camera.fx * (cam.x / cam.z) + camera.cx;
            let y = camera.fy * (cam.y / cam.z) + camera.cy;
            ((0.0..width).contains(&x) && (0.0..height).contains(&y)).then(|| Point2::new(x, y))
        })
        .collect()
}
