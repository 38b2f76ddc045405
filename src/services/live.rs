//! Live job updates.
//!
//! Polls the job store and turns frame-counter advances into update events,
//! finishing with exactly one terminal event.

use futures::Stream;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::models::geometry::{Point2, Point3, Pose, TrajectoryEntry};
use crate::models::job::{Job, JobId, JobStatus};
use crate::services::job_store::JobStore;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Full snapshot sent whenever `processed_frames` advances.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateEvent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: JobId,
    pub status: JobStatus,
    pub processed_frames: u64,
    pub total_frames: u64,
    pub current_pose: Option<Pose>,
    pub tracked_points_count: usize,
    pub tracked_points: Vec<Point3>,
    pub keypoints_2d: Vec<Point2>,
    pub all_map_points: Vec<Point3>,
    pub trajectory: Vec<TrajectoryEntry>,
    pub progress: f64,
}

/// Reduced snapshot sent once the job reaches a terminal status.
#[derive(Debug, Clone, Serialize)]
pub struct FinalEvent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: JobId,
    pub status: JobStatus,
    pub processed_frames: u64,
    pub total_frames: u64,
    pub trajectory: Vec<TrajectoryEntry>,
    pub keypoints_2d: Vec<Point2>,
    pub all_map_points: Vec<Point3>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Sent when the requested job does not exist.
#[derive(Debug, Clone, Serialize)]
pub struct MissingEvent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: JobId,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum LiveEvent {
    Update(Box<UpdateEvent>),
    Final(Box<FinalEvent>),
    Missing(MissingEvent),
}

impl LiveEvent {
    /// Event name on the wire: `update`, `complete` or `error`.
    pub fn name(&self) -> &'static str {
        match self {
            LiveEvent::Update(e) => e.kind,
            LiveEvent::Final(e) => e.kind,
            LiveEvent::Missing(e) => e.kind,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, LiveEvent::Update(_))
    }

    fn update(job: &Job) -> Self {
        let attrs = &job.attributes;
        LiveEvent::Update(Box::new(UpdateEvent {
            kind: "update",
            id: job.id,
            status: job.status,
            processed_frames: attrs.processed_frames,
            total_frames: attrs.total_frames,
            current_pose: attrs.current_pose,
            tracked_points_count: attrs.tracked_points_count,
            tracked_points: attrs.tracked_points.clone(),
            keypoints_2d: attrs.keypoints_2d.clone(),
            all_map_points: attrs.all_map_points.clone(),
            trajectory: attrs.trajectory.clone(),
            progress: attrs.progress(),
        }))
    }

    fn terminal(job: &Job) -> Self {
        let attrs = &job.attributes;
        let kind = match job.status {
            JobStatus::Failed => "error",
            _ => "complete",
        };
        LiveEvent::Final(Box::new(FinalEvent {
            kind,
            id: job.id,
            status: job.status,
            processed_frames: attrs.processed_frames,
            total_frames: attrs.total_frames,
            trajectory: attrs.trajectory.clone(),
            keypoints_2d: attrs.keypoints_2d.clone(),
            all_map_points: attrs.all_map_points.clone(),
            error: attrs.error.clone(),
            warning: attrs.warning.clone(),
        }))
    }

    fn missing(id: JobId) -> Self {
        LiveEvent::Missing(MissingEvent {
            kind: "error",
            id,
            message: "Processing not found".to_string(),
        })
    }
}

struct PollState {
    store: Arc<JobStore>,
    id: JobId,
    interval: Duration,
    last_frame: Option<u64>,
    polled: bool,
    pending: Option<LiveEvent>,
    done: bool,
}

/// Stream of live events for one job.
///
/// Emits an update whenever `processed_frames` advances, then one terminal
/// event (`complete` or `error`) and ends. An unknown job yields a single
/// `error` event.
pub fn job_updates(
    store: Arc<JobStore>,
    id: JobId,
    interval: Duration,
) -> impl Stream<Item = LiveEvent> + Send + 'static {
    let state = PollState {
        store,
        id,
        interval,
        last_frame: None,
        polled: false,
        pending: None,
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if state.done {
                return None;
            }
            if let Some(event) = state.pending.take() {
                state.done = true;
                return Some((event, state));
            }
            if state.polled {
                tokio::time::sleep(state.interval).await;
            }
            state.polled = true;

            let Some((frames, status)) = state.store.progress_marker(state.id).await else {
                state.done = true;
                return Some((LiveEvent::missing(state.id), state));
            };
            let advanced = state.last_frame.map_or(true, |last| frames > last);
            if !advanced && !status.is_terminal() {
                continue;
            }

            // Re-read the whole job; the marker only tells us something changed.
            let Some(job) = state.store.get(state.id).await else {
                state.done = true;
                return Some((LiveEvent::missing(state.id), state));
            };
            let terminal = job.status.is_terminal();

            if state.last_frame.map_or(true, |last| job.attributes.processed_frames > last) {
                state.last_frame = Some(job.attributes.processed_frames);
                if terminal {
                    state.pending = Some(LiveEvent::terminal(&job));
                }
                return Some((LiveEvent::update(&job), state));
            }
            if terminal {
                state.done = true;
                return Some((LiveEvent::terminal(&job), state));
            }
        }
    })
}
