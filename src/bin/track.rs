use slam_live::{
    config::AppConfig,
    models::job::{JobAttributes, JobKind, JobStatus},
    services::{
        camera_config::CameraConfigSynthesizer, ffmpeg::FfmpegDecoder, job_store::JobStore,
        processing::ProcessingService, tracker_process::ProcessOracleFactory,
    },
};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Run a single video through the tracking pipeline and print the final job.
#[tokio::main]
async fn main() -> ExitCode {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let Some(video) = std::env::args().nth(1) else {
        eprintln!("usage: track <video>");
        return ExitCode::from(2);
    };

    // Load configuration
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration");
            return ExitCode::from(2);
        }
    };

    let oracles = match ProcessOracleFactory::from_command_line(&config.tracker_command) {
        Ok(oracles) => oracles,
        Err(e) => {
            tracing::error!(error = %e, "Invalid tracker command");
            return ExitCode::from(2);
        }
    };
    let decoder = FfmpegDecoder::new(&config.ffmpeg_path, &config.ffprobe_path);
    let synthesizer = CameraConfigSynthesizer::new(
        &config.config_template_path,
        &config.config_artifact_dir,
    );

    let store = Arc::new(JobStore::new());
    let processing = ProcessingService::new(
        store.clone(),
        Arc::new(decoder),
        Arc::new(oracles),
        synthesizer,
    );

    let job = store
        .create(
            JobKind::VideoProcessing,
            JobAttributes {
                video_path: Some(video.clone()),
                ..Default::default()
            },
        )
        .await;

    tracing::info!(job_id = %job.id, video = %video, "Processing video");
    let status = processing.run(job.id).await;

    let Some(job) = store.get(job.id).await else {
        tracing::error!(job_id = %job.id, "Job disappeared from store");
        return ExitCode::FAILURE;
    };
    match serde_json::to_string_pretty(&job) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::error!(error = %e, "Failed to serialize job"),
    }

    match status {
        Some(JobStatus::Completed) | Some(JobStatus::CompletedWithWarnings) => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    }
}
