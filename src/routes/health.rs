use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub jobs: JobCounts,
}

#[derive(Serialize)]
pub struct JobCounts {
    pub total: usize,
    pub active: usize,
}

/// GET /health: liveness plus job store counts.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let jobs = JobCounts {
        total: state.store.count().await,
        active: state.store.count_active().await,
    };

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            jobs,
        }),
    )
}
