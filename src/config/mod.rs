use garde::Validate;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8000")
    #[serde(default = "default_bind_addr")]
    #[garde(length(min = 1))]
    pub bind_addr: String,

    /// Directory uploaded videos are written to
    #[serde(default = "default_upload_dir")]
    #[garde(length(min = 1))]
    pub upload_dir: String,

    /// Base tracker settings file the per-job camera settings are derived from
    #[serde(default = "default_config_template_path")]
    #[garde(length(min = 1))]
    pub config_template_path: String,

    /// Directory for per-job synthesized settings files
    #[serde(default = "default_config_artifact_dir")]
    #[garde(length(min = 1))]
    pub config_artifact_dir: String,

    #[serde(default = "default_ffmpeg_path")]
    #[garde(length(min = 1))]
    pub ffmpeg_path: String,

    #[serde(default = "default_ffprobe_path")]
    #[garde(length(min = 1))]
    pub ffprobe_path: String,

    /// Tracker bridge command line, e.g. "orbslam-bridge --vocab ORBvoc.txt"
    #[garde(length(min = 1))]
    pub tracker_command: String,

    /// Live update polling interval in milliseconds
    #[serde(default = "default_live_poll_interval_ms")]
    #[garde(range(min = 10, max = 10_000))]
    pub live_poll_interval_ms: u64,

    /// Maximum accepted upload size in bytes
    #[serde(default = "default_max_upload_bytes")]
    #[garde(range(min = 1024))]
    pub max_upload_bytes: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_upload_dir() -> String {
    "uploads".to_string()
}

fn default_config_template_path() -> String {
    "config/tracker.yaml".to_string()
}

fn default_config_artifact_dir() -> String {
    "config/generated".to_string()
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

fn default_live_poll_interval_ms() -> u64 {
    crate::services::live::DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_max_upload_bytes() -> usize {
    2 * 1024 * 1024 * 1024
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn live_poll_interval(&self) -> Duration {
        Duration::from_millis(self.live_poll_interval_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] garde::Report),
}
