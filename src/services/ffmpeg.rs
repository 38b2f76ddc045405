use image::GrayImage;
use serde::Deserialize;
use std::ffi::OsString;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use crate::services::frame_source::{FrameSource, FrameSourceError, VideoDecoder, VideoMetadata};

/// Decodes videos with the `ffprobe`/`ffmpeg` command line tools.
pub struct FfmpegDecoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

#[derive(Deserialize)]
struct StreamReport {
    #[serde(default)]
    streams: Vec<StreamInfo>,
}

#[derive(Deserialize)]
struct StreamInfo {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

impl FfmpegDecoder {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }
}

impl VideoDecoder for FfmpegDecoder {
    fn inspect(&self, path: &Path) -> Result<VideoMetadata, FrameSourceError> {
        if !path.is_file() {
            return Err(FrameSourceError::NotFound(path.to_path_buf()));
        }
        let unreadable = |reason: String| FrameSourceError::Unreadable {
            path: path.to_path_buf(),
            reason,
        };

        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-select_streams", "v:0", "-show_entries"])
            .arg("stream=width,height,avg_frame_rate,r_frame_rate,nb_frames,duration")
            .args(["-of", "json"])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| unreadable(format!("failed to run ffprobe: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(unreadable(stderr.trim().to_string()));
        }

        let report: StreamReport = serde_json::from_slice(&output.stdout)
            .map_err(|e| unreadable(format!("unexpected ffprobe output: {e}")))?;
        let stream = report
            .streams
            .into_iter()
            .next()
            .ok_or_else(|| unreadable("no video stream".to_string()))?;

        let (width, height) = match (stream.width, stream.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
            _ => return Err(unreadable("video stream has no dimensions".to_string())),
        };

        let fps = stream
            .avg_frame_rate
            .as_deref()
            .and_then(parse_rate)
            .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate))
            .unwrap_or(0.0);

        let total_frames = stream
            .nb_frames
            .as_deref()
            .and_then(|n| n.parse::<u64>().ok())
            .or_else(|| {
                let duration: f64 = stream.duration.as_deref()?.parse().ok()?;
                (duration > 0.0 && fps > 0.0).then(|| (duration * fps).round() as u64)
            })
            .unwrap_or(0);

        Ok(VideoMetadata {
            width,
            height,
            fps,
            total_frames,
        })
    }

    fn open(
        &self,
        path: &Path,
        metadata: &VideoMetadata,
    ) -> Result<Box<dyn FrameSource>, FrameSourceError> {
        let mut child = Command::new(&self.ffmpeg)
            .args(decode_args(path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| FrameSourceError::Unreadable {
                path: path.to_path_buf(),
                reason: format!("failed to start ffmpeg: {e}"),
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FrameSourceError::Decode("ffmpeg stdout unavailable".to_string()))?;

        tracing::debug!(
            path = %path.display(),
            width = metadata.width,
            height = metadata.height,
            "Started ffmpeg decoder"
        );

        Ok(Box::new(FfmpegFrames {
            child: Some(child),
            stdout: Some(stdout),
            width: metadata.width,
            height: metadata.height,
        }))
    }
}

/// Arguments streaming `path` as raw 8-bit gray frames on stdout.
///
/// Autorotation stays off: ffprobe reports the coded width and height, and
/// rotated output would no longer match that frame stride.
fn decode_args(path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-v", "error", "-nostdin", "-noautorotate", "-i"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(path.as_os_str().to_owned());
    args.extend(
        ["-f", "rawvideo", "-pix_fmt", "gray", "-"]
            .into_iter()
            .map(OsString::from),
    );
    args
}

/// Parse an ffprobe rational such as `30000/1001`.
fn parse_rate(rate: &str) -> Option<f64> {
    let (num, den) = rate.split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    (den > 0.0 && num > 0.0).then(|| num / den)
}

/// Raw 8-bit grayscale frames read from an `ffmpeg` child process.
struct FfmpegFrames {
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    width: u32,
    height: u32,
}

impl FrameSource for FfmpegFrames {
    fn next_frame(&mut self) -> Result<Option<GrayImage>, FrameSourceError> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };

        let frame_len = self.width as usize * self.height as usize;
        let mut buf = vec![0u8; frame_len];
        let mut filled = 0;
        while filled < frame_len {
            match stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if filled < frame_len {
            if filled > 0 {
                tracing::warn!(bytes = filled, expected = frame_len, "Dropping truncated final frame");
            }
            return Ok(None);
        }

        GrayImage::from_raw(self.width, self.height, buf)
            .map(Some)
            .ok_or_else(|| FrameSourceError::Decode("frame buffer size mismatch".to_string()))
    }

    fn release(&mut self) {
        self.stdout.take();
        if let Some(mut child) = self.child.take() {
            // ffmpeg may still be writing; it has nothing left to give us.
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for FfmpegFrames {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rate() {
        assert_eq!(parse_rate("30/1"), Some(30.0));
        assert!((parse_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_rate("0/0"), None);
        assert_eq!(parse_rate("garbage"), None);
    }

    #[test]
    fn test_decode_keeps_coded_orientation() {
        let args = decode_args(Path::new("clips/portrait.mp4"));
        let position = |flag: &str| args.iter().position(|a| a == flag);

        let input = position("-i").unwrap();
        let noautorotate = position("-noautorotate").expect("autorotation disabled");
        assert!(noautorotate < input, "must apply to the input");
        assert_eq!(args[input + 1], "clips/portrait.mp4");
        assert_eq!(position("gray").map(|i| args[i - 1].clone()), Some("-pix_fmt".into()));
        assert_eq!(args.last().unwrap(), "-");
    }

    #[test]
    fn test_inspect_missing_file() {
        let decoder = FfmpegDecoder::new("ffmpeg", "ffprobe");
        let err = decoder
            .inspect(Path::new("/definitely/not/here.mp4"))
            .unwrap_err();
        assert!(matches!(err, FrameSourceError::NotFound(_)));
        assert_eq!(err.to_string(), "Video file not found: /definitely/not/here.mp4");
    }
}
