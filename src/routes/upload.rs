use axum::extract::{Multipart, State};
use axum::http::{header, HeaderName, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::{stream, StreamExt};
use std::convert::Infallible;

use crate::app_state::AppState;
use crate::models::job::{Job, JobAttributes, JobKind};
use crate::models::processing::{UploadResponse, UploadStreamEvent};
use crate::services::storage::{
    is_allowed_content_type, StoredUpload, UploadProgress, ALLOWED_CONTENT_TYPES,
};

/// POST /api/v1/upload: store a video and start processing it.
pub async fn upload_video(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, (StatusCode, String)> {
    let (original_filename, data) = read_video_field(multipart).await?;

    let stored = state
        .uploads
        .store(&data, &original_filename)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to store upload");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    let job = queue_processing(&state, &stored, Some(original_filename.clone())).await;

    Ok(Json(UploadResponse {
        id: job.id,
        file_id: stored.file_id,
        filename: stored.filename,
        path: stored.path.to_string_lossy().into_owned(),
        original_filename,
        size: data.len() as u64,
        message: "File uploaded and processing started".to_string(),
    }))
}

/// POST /api/v1/upload/stream: store a video, reporting write progress as
/// server-sent events, then start processing it.
///
/// Events: `progress` per written chunk, `complete` once stored,
/// `processing_started` with the job id, or a single `error`.
pub async fn upload_video_stream(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let (original_filename, data) = read_video_field(multipart).await?;

    let uploads = state.uploads.clone();
    let events = uploads
        .store_with_progress(data, original_filename.clone())
        .then(move |item| {
            let state = state.clone();
            let original_filename = original_filename.clone();
            async move {
                match item {
                    Ok(UploadProgress::Written { uploaded, total }) => {
                        vec![UploadStreamEvent::Progress {
                            progress: UploadProgress::percent(uploaded, total),
                            uploaded,
                            total,
                        }]
                    }
                    Ok(UploadProgress::Stored(stored)) => {
                        let size = tokio::fs::metadata(&stored.path)
                            .await
                            .map(|m| m.len())
                            .unwrap_or_default();
                        let job = queue_processing(&state, &stored, Some(original_filename)).await;
                        vec![
                            UploadStreamEvent::Complete {
                                id: stored.file_id.clone(),
                                filename: stored.filename.clone(),
                                path: stored.path.to_string_lossy().into_owned(),
                                size,
                            },
                            UploadStreamEvent::ProcessingStarted {
                                processing_id: job.id,
                                file_id: stored.file_id,
                            },
                        ]
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to store streamed upload");
                        vec![UploadStreamEvent::Error {
                            message: e.to_string(),
                        }]
                    }
                }
            }
        })
        .flat_map(stream::iter)
        .map(|event| {
            let sse = Event::default().event(event.name());
            Ok::<_, Infallible>(sse.json_data(&event).unwrap_or_else(|e| {
                tracing::error!(error = %e, "Failed to serialize upload event");
                Event::default().event("error").data(e.to_string())
            }))
        });

    Ok((
        [
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(events).keep_alive(KeepAlive::default()),
    ))
}

/// Create a queued job for a stored upload and start processing it.
pub(crate) async fn queue_processing(
    state: &AppState,
    stored: &StoredUpload,
    original_filename: Option<String>,
) -> Job {
    let job = state
        .store
        .create(
            JobKind::VideoProcessing,
            JobAttributes {
                file_id: Some(stored.file_id.clone()),
                video_path: Some(stored.path.to_string_lossy().into_owned()),
                filename: Some(stored.filename.clone()),
                original_filename,
                ..Default::default()
            },
        )
        .await;

    metrics::counter!("video_jobs_total").increment(1);
    tracing::info!(job_id = %job.id, file_id = %stored.file_id, "Processing queued");
    state.processing.spawn(job.id);
    job
}

/// Pull the `file` field out of a multipart body, checking its content type.
async fn read_video_field(
    mut multipart: Multipart,
) -> Result<(String, Vec<u8>), (StatusCode, String)> {
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let content_type = field.content_type().unwrap_or_default();
        if !is_allowed_content_type(content_type) {
            return Err((
                StatusCode::BAD_REQUEST,
                format!(
                    "Unsupported content type. Use {}",
                    ALLOWED_CONTENT_TYPES.join(", ")
                ),
            ));
        }

        let filename = field.file_name().unwrap_or("upload").to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
        upload = Some((filename, data.to_vec()));
    }

    upload.ok_or((StatusCode::BAD_REQUEST, "Missing 'file' field".to_string()))
}
