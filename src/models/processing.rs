use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::job::{Job, JobId, JobKind, JobStatus};

/// Response after a video has been uploaded and queued for processing.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub id: JobId,
    pub file_id: String,
    pub filename: String,
    pub path: String,
    pub original_filename: String,
    pub size: u64,
    pub message: String,
}

/// One server-sent event of a progress-reporting upload.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UploadStreamEvent {
    Progress {
        progress: u8,
        uploaded: u64,
        total: u64,
    },
    Complete {
        id: String,
        filename: String,
        path: String,
        size: u64,
    },
    ProcessingStarted {
        processing_id: JobId,
        file_id: String,
    },
    Error {
        message: String,
    },
}

impl UploadStreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            UploadStreamEvent::Progress { .. } => "progress",
            UploadStreamEvent::Complete { .. } => "complete",
            UploadStreamEvent::ProcessingStarted { .. } => "processing_started",
            UploadStreamEvent::Error { .. } => "error",
        }
    }
}

/// Response after processing was started for an already stored upload.
#[derive(Debug, Serialize, Deserialize)]
pub struct StartProcessingResponse {
    pub message: String,
    pub processing_id: JobId,
    pub file_id: String,
    pub video_path: String,
}

/// Query filter for listing jobs.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct JobListQuery {
    #[garde(skip)]
    pub kind: Option<JobKind>,

    #[garde(skip)]
    pub active: Option<bool>,

    #[garde(range(min = 1, max = 1000))]
    pub limit: Option<usize>,
}

/// Compact job view used by listings; omits the heavy point clouds.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub kind: JobKind,
    pub active: bool,
    pub status: JobStatus,
    pub processed_frames: u64,
    pub total_frames: u64,
    pub progress: f64,
    pub map_points: usize,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            kind: job.kind,
            active: job.active,
            status: job.status,
            processed_frames: job.attributes.processed_frames,
            total_frames: job.attributes.total_frames,
            progress: job.attributes.progress(),
            map_points: job.attributes.all_map_points.len(),
            created_at: job.created_at,
            error: job.attributes.error.clone(),
            warning: job.attributes.warning.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_upload_stream_event_wire_shape() {
        let progress = UploadStreamEvent::Progress {
            progress: 50,
            uploaded: 5,
            total: 10,
        };
        assert_eq!(progress.name(), "progress");
        assert_eq!(
            serde_json::to_value(&progress).unwrap(),
            serde_json::json!({"type": "progress", "progress": 50, "uploaded": 5, "total": 10})
        );

        let id = Uuid::new_v4();
        let started = UploadStreamEvent::ProcessingStarted {
            processing_id: id,
            file_id: "abc".into(),
        };
        let json = serde_json::to_value(&started).unwrap();
        assert_eq!(json["type"], "processing_started");
        assert_eq!(json["processing_id"], id.to_string());
        assert_eq!(started.name(), "processing_started");
    }
}
