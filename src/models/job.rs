use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::geometry::{Point2, Point3, Pose, TrajectoryEntry};

pub type JobId = Uuid;

/// Category of a job held in the store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, EnumString, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobKind {
    VideoProcessing,
    /// Live camera sessions. Reserved; never driven by the processing loop.
    Stream,
}

/// Lifecycle of a video processing job.
///
/// `queued -> initializing -> processing -> {completed | completed_with_warnings | failed}`,
/// with a direct jump to `failed` allowed from any non-terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, EnumString, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Initializing,
    Processing,
    Completed,
    CompletedWithWarnings,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::CompletedWithWarnings | JobStatus::Failed
        )
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Queued, Initializing)
                | (Initializing, Processing)
                | (Processing, Completed)
                | (Processing, CompletedWithWarnings)
                | (_, Failed)
        ) || self == next
    }
}

/// The mutable attribute bag of a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobAttributes {
    // Upload provenance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,

    // Video metadata
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub total_frames: u64,

    // Tracking progress
    pub processed_frames: u64,
    pub trajectory: Vec<TrajectoryEntry>,
    pub current_pose: Option<Pose>,
    pub tracked_points_count: usize,
    pub tracked_points: Vec<Point3>,
    pub all_map_points: Vec<Point3>,
    pub keypoints_2d: Vec<Point2>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// A shallow partial update: present fields overwrite, absent fields are kept.
///
/// `trajectory_append` and `map_points_append` grow the stored lists in place
/// instead of replacing them.
#[derive(Debug, Clone, Default)]
pub struct AttributesPatch {
    pub status: Option<JobStatus>,
    pub file_id: Option<String>,
    pub video_path: Option<String>,
    pub filename: Option<String>,
    pub original_filename: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub total_frames: Option<u64>,
    pub processed_frames: Option<u64>,
    pub trajectory: Option<Vec<TrajectoryEntry>>,
    pub trajectory_append: Option<TrajectoryEntry>,
    pub current_pose: Option<Option<Pose>>,
    pub tracked_points_count: Option<usize>,
    pub tracked_points: Option<Vec<Point3>>,
    pub all_map_points: Option<Vec<Point3>>,
    pub map_points_append: Vec<Point3>,
    pub keypoints_2d: Option<Vec<Point2>>,
    pub error: Option<String>,
    pub warning: Option<String>,
}

impl AttributesPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

impl JobAttributes {
    /// Merge a patch into the attributes. Status is handled by the store.
    pub fn apply(&mut self, patch: AttributesPatch) {
        fn set<T>(slot: &mut T, value: Option<T>) {
            if let Some(v) = value {
                *slot = v;
            }
        }
        fn set_opt<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        set_opt(&mut self.file_id, patch.file_id);
        set_opt(&mut self.video_path, patch.video_path);
        set_opt(&mut self.filename, patch.filename);
        set_opt(&mut self.original_filename, patch.original_filename);
        set_opt(&mut self.width, patch.width);
        set_opt(&mut self.height, patch.height);
        set_opt(&mut self.fps, patch.fps);
        set(&mut self.total_frames, patch.total_frames);
        set(&mut self.processed_frames, patch.processed_frames);
        set(&mut self.trajectory, patch.trajectory);
        self.trajectory.extend(patch.trajectory_append);
        set(&mut self.current_pose, patch.current_pose);
        set(&mut self.tracked_points_count, patch.tracked_points_count);
        set(&mut self.tracked_points, patch.tracked_points);
        set(&mut self.all_map_points, patch.all_map_points);
        self.all_map_points.extend(patch.map_points_append);
        set(&mut self.keypoints_2d, patch.keypoints_2d);
        set_opt(&mut self.error, patch.error);
        set_opt(&mut self.warning, patch.warning);
    }

    /// Completion percentage in `[0, 100]`; zero while the frame count is unknown.
    pub fn progress(&self) -> f64 {
        if self.total_frames == 0 {
            return 0.0;
        }
        (self.processed_frames as f64 / self.total_frames as f64 * 100.0).clamp(0.0, 100.0)
    }
}

/// One tracked unit of work, owned by the job store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub active: bool,
    pub status: JobStatus,
    pub attributes: JobAttributes,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
