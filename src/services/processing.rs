use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::models::geometry::TrajectoryEntry;
use crate::models::job::{AttributesPatch, JobId, JobStatus};
use crate::services::camera_config::{CameraConfigSynthesizer, ConfigArtifact, SynthesisError};
use crate::services::frame_source::{FrameSource, FrameSourceError, VideoDecoder, VideoMetadata};
use crate::services::job_store::{JobStore, StoreError};
use crate::services::map_accumulator::MapAccumulator;
use crate::services::oracle::{Observation, OracleError, OracleFactory, TrackingOracle};
use crate::services::projector::{project_points, CameraIntrinsics};

/// Minimum tracked points for a frame to count as confidently tracked.
pub const MIN_TRACKED_POINTS: usize = 15;
/// Consecutive low-confidence frames after which processing stops.
pub const MAX_CONSECUTIVE_LOST: u32 = 50;
/// Current-frame 3-D points published per update.
pub const MAX_TRACKED_POINTS: usize = 500;
/// Current-frame 2-D keypoints published per update.
pub const MAX_KEYPOINTS: usize = 200;

/// How the frame loop ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// Every frame was consumed.
    Exhausted { frames: u64 },
    /// Tracking stayed lost for [`MAX_CONSECUTIVE_LOST`] frames starting at `since_frame`.
    TrackingLost { since_frame: u64, frames: u64 },
}

/// Drives video jobs through decoder, tracker and map accumulation,
/// publishing every frame's result to the job store.
#[derive(Clone)]
pub struct ProcessingService {
    store: Arc<JobStore>,
    decoder: Arc<dyn VideoDecoder>,
    oracles: Arc<dyn OracleFactory>,
    synthesizer: Arc<CameraConfigSynthesizer>,
}

impl ProcessingService {
    pub fn new(
        store: Arc<JobStore>,
        decoder: Arc<dyn VideoDecoder>,
        oracles: Arc<dyn OracleFactory>,
        synthesizer: CameraConfigSynthesizer,
    ) -> Self {
        Self {
            store,
            decoder,
            oracles,
            synthesizer: Arc::new(synthesizer),
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Run the job as an independent task.
    pub fn spawn(&self, job_id: JobId) -> JoinHandle<Option<JobStatus>> {
        let service = self.clone();
        tokio::spawn(
            async move { service.run(job_id).await }
                .instrument(tracing::info_span!("processing", job_id = %job_id)),
        )
    }

    /// Process one job end to end. Returns the terminal status, or `None` if
    /// the job does not exist.
    pub async fn run(&self, job_id: JobId) -> Option<JobStatus> {
        let Some(job) = self.store.get(job_id).await else {
            tracing::error!(job_id = %job_id, "Job not found in store");
            return None;
        };

        let started = Instant::now();
        metrics::gauge!("video_active_jobs").increment(1.0);

        let final_patch = match job.attributes.video_path.as_deref() {
            None => AttributesPatch::failed("Job has no video path"),
            Some(path) => {
                let path = PathBuf::from(path);
                let outcome = AssertUnwindSafe(self.process(job_id, &path))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        Err(ProcessingError::Panicked(panic_message(&*panic)))
                    });

                match outcome {
                    Ok(LoopOutcome::Exhausted { frames }) => {
                        tracing::info!(job_id = %job_id, frames, "Finished processing video");
                        AttributesPatch::status(JobStatus::Completed)
                    }
                    Ok(LoopOutcome::TrackingLost {
                        since_frame,
                        frames,
                    }) => {
                        tracing::warn!(
                            job_id = %job_id,
                            since_frame,
                            frames,
                            "Tracking lost for too long, stopping"
                        );
                        AttributesPatch {
                            status: Some(JobStatus::CompletedWithWarnings),
                            warning: Some(format!("Tracking lost after frame {since_frame}")),
                            ..Default::default()
                        }
                    }
                    Err(e) => {
                        tracing::error!(job_id = %job_id, error = %e, "Processing failed");
                        AttributesPatch::failed(e.to_string())
                    }
                }
            }
        };

        let status = self.finish(job_id, final_patch).await;

        metrics::gauge!("video_active_jobs").decrement(1.0);
        metrics::histogram!("video_processing_seconds").record(started.elapsed().as_secs_f64());
        match outcome_counter(status) {
            Some(counter) => metrics::counter!(counter).increment(1),
            None => {
                tracing::error!(job_id = %job_id, status = %status, "Job left in a non-terminal state")
            }
        }
        Some(status)
    }

    /// Write the terminal patch and deactivate the job.
    async fn finish(&self, job_id: JobId, patch: AttributesPatch) -> JobStatus {
        let status = match self.store.merge_attributes(job_id, patch).await {
            Ok(status) => status,
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to record final status");
                self.store
                    .get(job_id)
                    .await
                    .map_or(JobStatus::Failed, |job| job.status)
            }
        };
        if let Err(e) = self.store.set_active(job_id, false).await {
            tracing::error!(job_id = %job_id, error = %e, "Failed to deactivate job");
        }
        status
    }

    async fn process(&self, job_id: JobId, path: &Path) -> Result<LoopOutcome, ProcessingError> {
        let decoder = self.decoder.clone();
        let video = path.to_path_buf();
        let metadata = blocking(move || decoder.inspect(&video))
            .await?
            .map_err(|e| match e {
                FrameSourceError::NotFound(_) => ProcessingError::VideoNotFound(path.to_path_buf()),
                other => ProcessingError::VideoUnreadable {
                    path: path.to_path_buf(),
                    source: other,
                },
            })?;

        tracing::info!(
            job_id = %job_id,
            width = metadata.width,
            height = metadata.height,
            fps = metadata.fps,
            total_frames = metadata.total_frames,
            "Starting processing"
        );

        self.store
            .merge_attributes(
                job_id,
                AttributesPatch {
                    status: Some(JobStatus::Initializing),
                    width: Some(metadata.width),
                    height: Some(metadata.height),
                    fps: Some(metadata.fps),
                    total_frames: Some(metadata.total_frames),
                    processed_frames: Some(0),
                    trajectory: Some(Vec::new()),
                    current_pose: Some(None),
                    tracked_points_count: Some(0),
                    tracked_points: Some(Vec::new()),
                    all_map_points: Some(Vec::new()),
                    keypoints_2d: Some(Vec::new()),
                    ..Default::default()
                },
            )
            .await?;

        let config = self.synthesizer.synthesize(job_id, &metadata).await?;
        let intrinsics = config.intrinsics;

        let oracles = self.oracles.clone();
        let decoder = self.decoder.clone();
        let video = path.to_path_buf();
        let session = blocking(move || {
            TrackingSession::open(&*oracles, &*decoder, &video, &metadata, config.artifact)
        })
        .await??;

        let (session, outcome) = match self
            .store
            .merge_attributes(job_id, AttributesPatch::status(JobStatus::Processing))
            .await
        {
            Ok(_) => self.frame_loop(job_id, session, &metadata, &intrinsics).await,
            Err(e) => (Some(session), Err(e.into())),
        };
        if let Some(session) = session {
            session.close().await;
        }
        outcome
    }

    /// Feed every frame to the tracker, publishing each result.
    ///
    /// Hands the session back unless it was lost to a panic on the blocking
    /// pool, in which case it has already been dropped there.
    async fn frame_loop(
        &self,
        job_id: JobId,
        mut session: TrackingSession,
        metadata: &VideoMetadata,
        camera: &CameraIntrinsics,
    ) -> (Option<TrackingSession>, Result<LoopOutcome, ProcessingError>) {
        let dt = metadata.frame_interval();
        let mut map = MapAccumulator::new();
        let mut consecutive_lost: u32 = 0;
        let mut loss_started_at: u64 = 0;
        let mut frame_idx: u64 = 0;

        loop {
            let timestamp = frame_idx as f64 * dt;
            let stepped = blocking(move || {
                let step = session.step(timestamp);
                (session, step)
            })
            .await;
            let step = match stepped {
                Ok((returned, step)) => {
                    session = returned;
                    step
                }
                Err(e) => return (None, Err(e)),
            };
            let observation = match step {
                Ok(FrameStep::EndOfVideo) => {
                    return (Some(session), Ok(LoopOutcome::Exhausted { frames: frame_idx }))
                }
                Ok(FrameStep::Tracked(observation)) => observation,
                Err(e) => return (Some(session), Err(e)),
            };

            let mut patch = AttributesPatch::default();
            match observation {
                Some(obs) if obs.points.len() >= MIN_TRACKED_POINTS => {
                    consecutive_lost = 0;

                    let mut keypoints = project_points(&obs.points, &obs.pose, camera);
                    if keypoints.is_empty() {
                        keypoints = obs.keypoints;
                    }
                    keypoints.truncate(MAX_KEYPOINTS);

                    let known = map.len();
                    map.extend(&obs.points);

                    tracing::debug!(
                        job_id = %job_id,
                        frame = frame_idx,
                        points = obs.points.len(),
                        new_map_points = map.len() - known,
                        map_points = map.len(),
                        "Tracking OK"
                    );

                    patch.current_pose = Some(Some(obs.pose));
                    patch.tracked_points_count = Some(obs.points.len());
                    patch.tracked_points =
                        Some(obs.points.iter().take(MAX_TRACKED_POINTS).copied().collect());
                    patch.keypoints_2d = Some(keypoints);
                    patch.map_points_append = map.points()[known..].to_vec();
                    patch.trajectory_append = Some(TrajectoryEntry {
                        frame: frame_idx,
                        pose: obs.pose,
                    });
                }
                low_or_lost => {
                    if consecutive_lost == 0 {
                        loss_started_at = frame_idx;
                    }
                    consecutive_lost += 1;
                    metrics::counter!("video_tracking_lost_frames_total").increment(1);

                    match low_or_lost {
                        Some(obs) => tracing::warn!(
                            job_id = %job_id,
                            frame = frame_idx,
                            points = obs.points.len(),
                            "Low tracking quality"
                        ),
                        None => tracing::debug!(job_id = %job_id, frame = frame_idx, "Tracking lost"),
                    }
                }
            }

            frame_idx += 1;
            patch.processed_frames = Some(frame_idx);
            if let Err(e) = self.store.merge_attributes(job_id, patch).await {
                return (Some(session), Err(e.into()));
            }
            metrics::counter!("video_frames_processed_total").increment(1);

            if consecutive_lost >= MAX_CONSECUTIVE_LOST {
                let outcome = LoopOutcome::TrackingLost {
                    since_frame: loss_started_at,
                    frames: frame_idx,
                };
                return (Some(session), Ok(outcome));
            }

            tokio::task::yield_now().await;
        }
    }
}

/// Run a synchronous collaborator call on the blocking pool so a slow
/// decoder or tracker stalls only its own job.
async fn blocking<T, F>(call: F) -> Result<T, ProcessingError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(call).await.map_err(|e| {
        if e.is_panic() {
            ProcessingError::Panicked(panic_message(&*e.into_panic()))
        } else {
            ProcessingError::Cancelled
        }
    })
}

enum FrameStep {
    EndOfVideo,
    Tracked(Option<Observation>),
}

/// Per-run tracker, decoder and settings file. Dropping it releases all
/// three, on every exit path including unwinding.
struct TrackingSession {
    oracle: Box<dyn TrackingOracle>,
    frames: Box<dyn FrameSource>,
    _settings: ConfigArtifact,
}

impl TrackingSession {
    fn open(
        oracles: &dyn OracleFactory,
        decoder: &dyn VideoDecoder,
        video: &Path,
        metadata: &VideoMetadata,
        settings: ConfigArtifact,
    ) -> Result<Self, ProcessingError> {
        let mut oracle = oracles
            .init(settings.path())
            .map_err(ProcessingError::OracleInit)?;
        let frames = match decoder.open(video, metadata) {
            Ok(frames) => frames,
            Err(e) => {
                oracle.shutdown();
                return Err(e.into());
            }
        };
        Ok(Self {
            oracle,
            frames,
            _settings: settings,
        })
    }

    fn step(&mut self, timestamp: f64) -> Result<FrameStep, ProcessingError> {
        let Some(frame) = self.frames.next_frame()? else {
            return Ok(FrameStep::EndOfVideo);
        };
        self.oracle
            .track(&frame, timestamp)
            .map(FrameStep::Tracked)
            .map_err(ProcessingError::Oracle)
    }

    /// Release everything on the blocking pool; tracker shutdown may wait on
    /// the child process.
    async fn close(self) {
        if let Err(e) = tokio::task::spawn_blocking(move || drop(self)).await {
            tracing::error!(error = %e, "Failed to release tracking session");
        }
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        self.frames.release();
        self.oracle.shutdown();
    }
}

/// Counter a finished job is tallied under, `None` for a job that never
/// reached a terminal status.
fn outcome_counter(status: JobStatus) -> Option<&'static str> {
    match status {
        JobStatus::Completed | JobStatus::CompletedWithWarnings => Some("video_jobs_completed"),
        JobStatus::Failed => Some("video_jobs_failed"),
        JobStatus::Queued | JobStatus::Initializing | JobStatus::Processing => None,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Video file not found: {}", .0.display())]
    VideoNotFound(PathBuf),

    #[error("Cannot open video: {}", path.display())]
    VideoUnreadable {
        path: PathBuf,
        #[source]
        source: FrameSourceError,
    },

    #[error("Failed to generate temporary config file: {0}")]
    ConfigSynthesis(#[from] SynthesisError),

    #[error("{0}")]
    OracleInit(OracleError),

    #[error("{0}")]
    Oracle(OracleError),

    #[error("{0}")]
    FrameSource(#[from] FrameSourceError),

    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("Processing panicked: {0}")]
    Panicked(String),

    #[error("Processing was cancelled")]
    Cancelled,
}
