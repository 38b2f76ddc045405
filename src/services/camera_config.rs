use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::models::job::JobId;
use crate::services::frame_source::VideoMetadata;
use crate::services::projector::CameraIntrinsics;

/// Focal length as a multiple of the longer image side.
///
/// A rough field-of-view heuristic, not a calibration.
pub const FOCAL_LENGTH_FACTOR: f64 = 1.2;

/// Intrinsics guessed from the video resolution: square pixels, principal
/// point at the image centre.
pub fn estimate_intrinsics(width: u32, height: u32) -> CameraIntrinsics {
    let focal = f64::from(width.max(height)) * FOCAL_LENGTH_FACTOR;
    CameraIntrinsics {
        fx: focal,
        fy: focal,
        cx: f64::from(width) / 2.0,
        cy: f64::from(height) / 2.0,
        width,
        height,
    }
}

/// Writes per-job tracker settings derived from a base template.
pub struct CameraConfigSynthesizer {
    template_path: PathBuf,
    artifact_dir: PathBuf,
}

/// Result of synthesis: the settings file on disk and the intrinsics in it.
pub struct SynthesizedConfig {
    pub artifact: ConfigArtifact,
    pub intrinsics: CameraIntrinsics,
}

impl CameraConfigSynthesizer {
    pub fn new(template_path: impl Into<PathBuf>, artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            template_path: template_path.into(),
            artifact_dir: artifact_dir.into(),
        }
    }

    /// Render the template for `metadata` and write it as
    /// `config_temp_<job_id>.yaml` in the artifact directory.
    pub async fn synthesize(
        &self,
        job_id: JobId,
        metadata: &VideoMetadata,
    ) -> Result<SynthesizedConfig, SynthesisError> {
        if !tokio::fs::try_exists(&self.template_path).await.unwrap_or(false) {
            return Err(SynthesisError::TemplateMissing(self.template_path.clone()));
        }
        let template = tokio::fs::read_to_string(&self.template_path)
            .await
            .map_err(SynthesisError::Read)?;

        let intrinsics = estimate_intrinsics(metadata.width, metadata.height);
        let rendered = render_settings(&template, metadata, &intrinsics);

        tokio::fs::create_dir_all(&self.artifact_dir)
            .await
            .map_err(SynthesisError::Write)?;
        // Guard first: a failed or partial write must not leave the file behind.
        let artifact = ConfigArtifact {
            path: self.artifact_dir.join(format!("config_temp_{job_id}.yaml")),
        };
        tokio::fs::write(artifact.path(), rendered)
            .await
            .map_err(SynthesisError::Write)?;

        tracing::info!(
            job_id = %job_id,
            path = %artifact.path().display(),
            fx = intrinsics.fx,
            fy = intrinsics.fy,
            cx = intrinsics.cx,
            cy = intrinsics.cy,
            "Generated tracker settings"
        );

        Ok(SynthesizedConfig {
            artifact,
            intrinsics,
        })
    }
}

/// Rewrite the camera entries of an ORB-SLAM style `Key: value` settings file.
///
/// Distortion is zeroed and the working resolution pinned to the source
/// resolution. Entries the template lacks are appended.
pub fn render_settings(
    template: &str,
    metadata: &VideoMetadata,
    intrinsics: &CameraIntrinsics,
) -> String {
    let real = |v: f64| format!("{v:.6}");
    let overrides: Vec<(&str, String)> = vec![
        ("Camera1.fx", real(intrinsics.fx)),
        ("Camera1.fy", real(intrinsics.fy)),
        ("Camera1.cx", real(intrinsics.cx)),
        ("Camera1.cy", real(intrinsics.cy)),
        ("Camera1.k1", real(0.0)),
        ("Camera1.k2", real(0.0)),
        ("Camera1.p1", real(0.0)),
        ("Camera1.p2", real(0.0)),
        ("Camera.width", metadata.width.to_string()),
        ("Camera.height", metadata.height.to_string()),
        // Integer frame rate, truncated.
        ("Camera.fps", (metadata.fps.max(0.0) as u64).to_string()),
        ("Camera.newWidth", metadata.width.to_string()),
        ("Camera.newHeight", metadata.height.to_string()),
    ];

    let mut written = HashSet::new();
    let mut lines: Vec<String> = template
        .lines()
        .map(|line| match setting_key(line) {
            Some(key) => match overrides.iter().find(|(k, _)| *k == key) {
                Some((k, value)) => {
                    written.insert(*k);
                    format!("{k}: {value}")
                }
                None => line.to_string(),
            },
            None => line.to_string(),
        })
        .collect();

    for (key, value) in &overrides {
        if !written.contains(key) {
            lines.push(format!("{key}: {value}"));
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn setting_key(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') || trimmed.starts_with('%') {
        return None;
    }
    let (key, _) = trimmed.split_once(':')?;
    Some(key.trim())
}

/// A synthesized settings file, removed from disk when dropped.
#[derive(Debug)]
pub struct ConfigArtifact {
    path: PathBuf,
}

impl ConfigArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ConfigArtifact {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed tracker settings"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove tracker settings"
            ),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("settings template not found: {}", .0.display())]
    TemplateMissing(PathBuf),

    #[error("failed to read settings template: {0}")]
    Read(std::io::Error),

    #[error("failed to write settings: {0}")]
    Write(std::io::Error),
}
