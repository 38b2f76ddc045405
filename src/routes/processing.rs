use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderName, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::{Stream, StreamExt};
use garde::Validate;
use std::convert::Infallible;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::processing::{JobListQuery, JobSummary, StartProcessingResponse};
use crate::routes::upload::queue_processing;
use crate::services::live::{self, LiveEvent};
use crate::services::storage::content_type_for;

/// POST /api/v1/processing/start/{file_id}: process an already stored upload.
pub async fn start_processing(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Json<StartProcessingResponse>, (StatusCode, String)> {
    let stored = state
        .uploads
        .find(&file_id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                format!("Video file with id {file_id} not found"),
            )
        })?;

    let video_path = stored.path.to_string_lossy().into_owned();
    let job = queue_processing(&state, &stored, None).await;

    Ok(Json(StartProcessingResponse {
        message: "Processing started".to_string(),
        processing_id: job.id,
        file_id: stored.file_id,
        video_path,
    }))
}

/// GET /api/v1/processing: list jobs, optionally filtered.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobListQuery>,
) -> Result<Json<Vec<JobSummary>>, (StatusCode, String)> {
    query
        .validate()
        .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;

    let jobs = state.store.list(query.kind, query.active).await;
    let limit = query.limit.unwrap_or(usize::MAX);
    Ok(Json(jobs.iter().take(limit).map(JobSummary::from).collect()))
}

/// GET /api/v1/processing/{id}: live job updates as server-sent events.
pub async fn processing_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let events = live::job_updates(state.store.clone(), id, state.live_poll_interval);
    (
        [(HeaderName::from_static("x-accel-buffering"), "no")],
        Sse::new(sse_events(events)).keep_alive(KeepAlive::default()),
    )
}

fn sse_events(
    events: impl Stream<Item = LiveEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    events.map(|event| {
        let sse = Event::default().event(event.name());
        Ok(sse.json_data(&event).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to serialize live event");
            Event::default().event("error").data(e.to_string())
        }))
    })
}

/// GET /api/v1/processing/{id}/video: the job's original video file.
pub async fn processing_video(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let job = state
        .store
        .get(id)
        .await
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Processing with id {id} not found")))?;
    let video_path = job.attributes.video_path.ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            "Video path not found in processing data".to_string(),
        )
    })?;

    let path = std::path::PathBuf::from(&video_path);
    let file = tokio::fs::File::open(&path).await.map_err(|_| {
        (
            StatusCode::NOT_FOUND,
            format!("Video file not found: {video_path}"),
        )
    })?;

    let headers = [
        (header::CONTENT_TYPE, content_type_for(&path).to_string()),
        (header::ACCEPT_RANGES, "none".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("inline; filename=\"video_{id}\""),
        ),
        (header::CACHE_CONTROL, "public, max-age=3600".to_string()),
    ];
    Ok((headers, Body::from_stream(ReaderStream::new(file))))
}
