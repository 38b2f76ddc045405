//! Live video tracking service
//!
//! This library provides the incremental processing pipeline behind
//! slam-live: video frames are fed to an external visual tracker, the
//! resulting trajectory and deduplicated 3-D map are accumulated per job, and
//! every job's progress is published to live subscribers.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;

use axum::extract::DefaultBodyLimit;
use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use app_state::AppState;

/// Build the HTTP router for the service.
pub fn router(state: AppState, prometheus: Arc<PrometheusHandle>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/upload", post(routes::upload::upload_video))
        .route(
            "/api/v1/upload/stream",
            post(routes::upload::upload_video_stream),
        )
        .route(
            "/api/v1/processing/start/{file_id}",
            post(routes::processing::start_processing),
        )
        .route("/api/v1/processing", get(routes::processing::list_jobs))
        .route(
            "/api/v1/processing/{id}",
            get(routes::processing::processing_events),
        )
        .route(
            "/api/v1/processing/{id}/video",
            get(routes::processing::processing_video),
        )
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
}
