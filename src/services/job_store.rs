use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::job::{AttributesPatch, Job, JobAttributes, JobId, JobKind, JobStatus};

/// Process-wide, memory-resident job table.
///
/// Each job is mutated by exactly one processing loop; readers (live update
/// streams, listings) only ever see cloned snapshots.
#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new job in `queued` state and return a snapshot of it.
    pub async fn create(&self, kind: JobKind, attributes: JobAttributes) -> Job {
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            kind,
            active: true,
            status: JobStatus::Queued,
            attributes,
            created_at: now,
            updated_at: now,
        };
        self.jobs.write().await.insert(job.id, job.clone());

        tracing::debug!(job_id = %job.id, kind = %kind, "Job created");
        job
    }

    pub async fn get(&self, id: JobId) -> Option<Job> {
        self.jobs.read().await.get(&id).cloned()
    }

    /// Frame counter and status without cloning the point clouds.
    pub async fn progress_marker(&self, id: JobId) -> Option<(u64, JobStatus)> {
        self.jobs
            .read()
            .await
            .get(&id)
            .map(|job| (job.attributes.processed_frames, job.status))
    }

    /// Shallow-merge `patch` into the job's attributes.
    ///
    /// Terminal jobs are frozen, status changes must follow the job state
    /// machine and the processed frame counter may never go backwards.
    /// Returns the job's status after the merge.
    pub async fn merge_attributes(
        &self,
        id: JobId,
        patch: AttributesPatch,
    ) -> Result<JobStatus, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if job.status.is_terminal() {
            return Err(StoreError::Finalized {
                id,
                status: job.status,
            });
        }
        if let Some(next) = patch.status {
            if !job.status.can_transition_to(next) {
                return Err(StoreError::InvalidTransition {
                    id,
                    from: job.status,
                    to: next,
                });
            }
        }
        if let Some(frames) = patch.processed_frames {
            if frames < job.attributes.processed_frames {
                return Err(StoreError::FrameCounterRegression {
                    id,
                    current: job.attributes.processed_frames,
                    requested: frames,
                });
            }
        }

        if let Some(next) = patch.status {
            job.status = next;
        }
        job.attributes.apply(patch);
        job.updated_at = Utc::now();
        Ok(job.status)
    }

    pub async fn set_active(&self, id: JobId, active: bool) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if active && job.status.is_terminal() {
            return Err(StoreError::Finalized {
                id,
                status: job.status,
            });
        }
        job.active = active;
        job.updated_at = Utc::now();
        Ok(())
    }

    /// Jobs matching the optional filters, oldest first.
    pub async fn list(&self, kind: Option<JobKind>, active: Option<bool>) -> Vec<Job> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|job| kind.map_or(true, |k| job.kind == k))
            .filter(|job| active.map_or(true, |a| job.active == a))
            .cloned()
            .collect();
        matching.sort_by_key(|job| job.created_at);
        matching
    }

    pub async fn count(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn count_active(&self) -> usize {
        self.jobs.read().await.values().filter(|j| j.active).count()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job {0} not found")]
    NotFound(JobId),

    #[error("Job {id} is already {status} and can no longer change")]
    Finalized { id: JobId, status: JobStatus },

    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job {id} processed frame counter cannot go from {current} back to {requested}")]
    FrameCounterRegression {
        id: JobId,
        current: u64,
        requested: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn queued_job(store: &JobStore) -> JobId {
        store
            .create(JobKind::VideoProcessing, JobAttributes::default())
            .await
            .id
    }

    #[tokio::test]
    async fn test_create_assigns_unique_ids() {
        let store = JobStore::new();
        let a = queued_job(&store).await;
        let b = queued_job(&store).await;
        assert_ne!(a, b);
        assert_eq!(store.count().await, 2);

        let job = store.get(a).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.active);
    }

    #[tokio::test]
    async fn test_merge_keeps_unpatched_fields() {
        let store = JobStore::new();
        let id = store
            .create(
                JobKind::VideoProcessing,
                JobAttributes {
                    file_id: Some("abc".into()),
                    ..Default::default()
                },
            )
            .await
            .id;

        let status = store
            .merge_attributes(
                id,
                AttributesPatch {
                    processed_frames: Some(7),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(status, JobStatus::Queued);

        let job = store.get(id).await.unwrap();
        assert_eq!(job.attributes.file_id.as_deref(), Some("abc"));
        assert_eq!(job.attributes.processed_frames, 7);
    }

    #[tokio::test]
    async fn test_merge_appends_without_resending_history() {
        use crate::models::geometry::{Point3, Pose, TrajectoryEntry};

        let store = JobStore::new();
        let id = queued_job(&store).await;
        for frame in 0..3u64 {
            let status = store
                .merge_attributes(
                    id,
                    AttributesPatch {
                        processed_frames: Some(frame + 1),
                        trajectory_append: Some(TrajectoryEntry {
                            frame,
                            pose: Pose::identity(),
                        }),
                        map_points_append: vec![Point3::new(frame as f64, 0.0, 1.0)],
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
            assert_eq!(status, JobStatus::Queued);
        }

        let job = store.get(id).await.unwrap();
        assert_eq!(
            job.attributes.trajectory.iter().map(|t| t.frame).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(job.attributes.all_map_points.len(), 3);
    }

    #[tokio::test]
    async fn test_merge_unknown_job() {
        let store = JobStore::new();
        let err = store
            .merge_attributes(Uuid::new_v4(), AttributesPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_terminal_job_is_frozen() {
        let store = JobStore::new();
        let id = queued_job(&store).await;
        store
            .merge_attributes(id, AttributesPatch::failed("boom"))
            .await
            .unwrap();

        let err = store
            .merge_attributes(
                id,
                AttributesPatch {
                    processed_frames: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Finalized { .. }));

        let job = store.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attributes.processed_frames, 0);
    }

    #[tokio::test]
    async fn test_rejects_skipping_processing() {
        let store = JobStore::new();
        let id = queued_job(&store).await;
        let err = store
            .merge_attributes(id, AttributesPatch::status(JobStatus::Completed))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_rejects_frame_counter_regression() {
        let store = JobStore::new();
        let id = queued_job(&store).await;
        let bump = |n| AttributesPatch {
            processed_frames: Some(n),
            ..Default::default()
        };
        store.merge_attributes(id, bump(5)).await.unwrap();
        let err = store.merge_attributes(id, bump(4)).await.unwrap_err();
        assert!(matches!(err, StoreError::FrameCounterRegression { .. }));
    }

    #[tokio::test]
    async fn test_list_filters_by_active_and_kind() {
        let store = JobStore::new();
        let a = queued_job(&store).await;
        let _b = queued_job(&store).await;
        store
            .create(JobKind::Stream, JobAttributes::default())
            .await;
        store.set_active(a, false).await.unwrap();

        assert_eq!(store.list(None, None).await.len(), 3);
        assert_eq!(store.list(Some(JobKind::VideoProcessing), None).await.len(), 2);
        assert_eq!(store.list(None, Some(true)).await.len(), 2);
        assert_eq!(store.count_active().await, 2);
    }

    #[test]
    fn test_progress_marker_tracks_frames_and_status() {
        tokio_test::block_on(async {
            let store = JobStore::new();
            assert!(store.progress_marker(Uuid::new_v4()).await.is_none());

            let id = queued_job(&store).await;
            assert_eq!(store.progress_marker(id).await, Some((0, JobStatus::Queued)));

            store
                .merge_attributes(
                    id,
                    AttributesPatch {
                        status: Some(JobStatus::Initializing),
                        processed_frames: Some(3),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
            assert_eq!(
                store.progress_marker(id).await,
                Some((3, JobStatus::Initializing))
            );
        });
    }
}
