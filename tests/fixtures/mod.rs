//! Fixtures shared by the pipeline and live update tests
#![allow(dead_code)]

use slam_live::services::frame_source::VideoMetadata;

/// Minimal ORB-SLAM style settings template
pub const SETTINGS_TEMPLATE: &str = "%YAML:1.0\n\
    Camera.type: \"PinHole\"\n\
    Camera1.fx: 458.654\n\
    Camera1.fy: 457.296\n\
    Camera1.cx: 367.215\n\
    Camera1.cy: 248.375\n\
    Camera1.k1: -0.28340811\n\
    Camera1.k2: 0.07395907\n\
    Camera1.p1: 0.00019359\n\
    Camera1.p2: 1.76187114e-05\n\
    Camera.width: 752\n\
    Camera.height: 480\n\
    Camera.fps: 20\n";

/// A short VGA clip
pub fn vga_video(total_frames: u64) -> VideoMetadata {
    VideoMetadata {
        width: 640,
        height: 480,
        fps: 25.0,
        total_frames,
    }
}
