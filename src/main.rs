use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use slam_live::app_state::AppState;
use slam_live::config::AppConfig;
use slam_live::services::{
    camera_config::CameraConfigSynthesizer, ffmpeg::FfmpegDecoder, job_store::JobStore,
    processing::ProcessingService, storage::UploadStorage,
    tracker_process::ProcessOracleFactory,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing slam-live server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!("video_jobs_total", "Total video processing jobs submitted");
    metrics::describe_counter!("video_jobs_completed", "Video jobs that finished without failing");
    metrics::describe_counter!("video_jobs_failed", "Video jobs that failed");
    metrics::describe_counter!("video_frames_processed_total", "Frames fed to the tracker");
    metrics::describe_counter!(
        "video_tracking_lost_frames_total",
        "Frames without a confident tracking result"
    );
    metrics::describe_histogram!(
        "video_processing_seconds",
        "Wall time to process one video job"
    );
    metrics::describe_gauge!("video_active_jobs", "Jobs currently being processed");

    // External collaborators: ffmpeg for decoding, a tracker bridge process per job
    tracing::info!(ffmpeg = %config.ffmpeg_path, "Initializing video decoder");
    let decoder = FfmpegDecoder::new(&config.ffmpeg_path, &config.ffprobe_path);

    tracing::info!(command = %config.tracker_command, "Initializing tracker bridge");
    let oracles = ProcessOracleFactory::from_command_line(&config.tracker_command)
        .expect("Invalid tracker command");

    let synthesizer = CameraConfigSynthesizer::new(
        &config.config_template_path,
        &config.config_artifact_dir,
    );

    let store = Arc::new(JobStore::new());
    let processing =
        ProcessingService::new(store, Arc::new(decoder), Arc::new(oracles), synthesizer);

    // Create shared application state
    let state = AppState::new(
        processing,
        UploadStorage::new(&config.upload_dir),
        config.live_poll_interval(),
    );

    let app = slam_live::router(state, prometheus_handle, config.max_upload_bytes);

    tracing::info!("Starting slam-live on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
