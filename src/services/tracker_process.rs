use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

use crate::models::geometry::{Point2, Point3, Pose};
use crate::services::oracle::{Observation, OracleError, OracleFactory, TrackingOracle};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Launches an external tracker executable per job.
///
/// Wire protocol over the child's stdin/stdout, one JSON object per line:
/// `{"cmd":"init","settings":...}`, then per frame a
/// `{"cmd":"track","timestamp":..,"width":..,"height":..}` header followed by
/// `width*height` raw grayscale bytes, and finally `{"cmd":"shutdown"}`.
/// Every request except shutdown is answered by one response line.
pub struct ProcessOracleFactory {
    program: String,
    args: Vec<String>,
}

#[derive(Serialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum Request<'a> {
    Init { settings: &'a str },
    Track { timestamp: f64, width: u32, height: u32 },
    Shutdown,
}

#[derive(Deserialize)]
struct Response {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    pose: Option<Pose>,
    #[serde(default)]
    points: Vec<[f64; 3]>,
    #[serde(default)]
    keypoints: Vec<[f64; 2]>,
}

impl ProcessOracleFactory {
    /// Build from a whitespace separated command line, e.g. `orbslam-bridge --vocab ORBvoc.txt`.
    pub fn from_command_line(command: &str) -> Result<Self, OracleError> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| OracleError::Init("empty tracker command".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl OracleFactory for ProcessOracleFactory {
    fn init(&self, settings: &Path) -> Result<Box<dyn TrackingOracle>, OracleError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| OracleError::Init(format!("failed to start {}: {e}", self.program)))?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, BufReader::new(stdout)),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(OracleError::Init("tracker pipes unavailable".to_string()));
            }
        };

        let mut oracle = ProcessOracle {
            child: Some(child),
            stdin: Some(stdin),
            stdout: Some(stdout),
        };

        let settings = settings.to_string_lossy();
        let init = Request::Init {
            settings: settings.as_ref(),
        };
        let response = oracle
            .request(&init, None)
            .map_err(|e| OracleError::Init(e.to_string()))?;
        if !response.ok {
            let reason = response.error.unwrap_or_else(|| "tracker refused settings".to_string());
            return Err(OracleError::Init(reason));
        }

        tracing::info!(program = %self.program, "Tracker process initialized");
        Ok(Box::new(oracle))
    }
}

struct ProcessOracle {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
}

impl ProcessOracle {
    fn request(
        &mut self,
        request: &Request<'_>,
        payload: Option<&[u8]>,
    ) -> Result<Response, OracleError> {
        let (stdin, stdout) = match (self.stdin.as_mut(), self.stdout.as_mut()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => return Err(OracleError::ShutDown),
        };

        let mut header = serde_json::to_vec(request)?;
        header.push(b'\n');
        stdin.write_all(&header)?;
        if let Some(bytes) = payload {
            stdin.write_all(bytes)?;
        }
        stdin.flush()?;

        let mut line = String::new();
        if stdout.read_line(&mut line)? == 0 {
            return Err(OracleError::Protocol("tracker closed its output".to_string()));
        }
        Ok(serde_json::from_str(line.trim_end())?)
    }
}

impl TrackingOracle for ProcessOracle {
    fn track(
        &mut self,
        frame: &GrayImage,
        timestamp: f64,
    ) -> Result<Option<Observation>, OracleError> {
        let request = Request::Track {
            timestamp,
            width: frame.width(),
            height: frame.height(),
        };
        let response = self.request(&request, Some(frame.as_raw()))?;

        if !response.ok {
            return Ok(None);
        }
        // A successful track without a pose is still a lost frame for us.
        let Some(pose) = response.pose else {
            return Ok(None);
        };

        Ok(Some(Observation {
            pose,
            points: response
                .points
                .into_iter()
                .map(|[x, y, z]| Point3::new(x, y, z))
                .collect(),
            keypoints: response
                .keypoints
                .into_iter()
                .map(|[x, y]| Point2::new(x, y))
                .collect(),
        }))
    }

    fn shutdown(&mut self) {
        if let Some(mut stdin) = self.stdin.take() {
            if let Ok(mut line) = serde_json::to_vec(&Request::Shutdown) {
                line.push(b'\n');
                let _ = stdin.write_all(&line).and_then(|_| stdin.flush());
            }
        }
        self.stdout.take();

        let Some(mut child) = self.child.take() else {
            return;
        };
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!(%status, "Tracker process exited");
                    return;
                }
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(20));
                }
                _ => break,
            }
        }
        tracing::warn!("Tracker process did not exit in time, killing it");
        let _ = child.kill();
        let _ = child.wait();
    }
}

impl Drop for ProcessOracle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
