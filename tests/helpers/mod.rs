//! Scripted stand-ins for the decoder and tracker collaborators
#![allow(dead_code)]

use image::GrayImage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use uuid::Uuid;

use slam_live::models::geometry::{Point2, Point3, Pose};
use slam_live::models::job::{JobAttributes, JobId, JobKind};
use slam_live::services::camera_config::CameraConfigSynthesizer;
use slam_live::services::frame_source::{
    FrameSource, FrameSourceError, VideoDecoder, VideoMetadata,
};
use slam_live::services::job_store::JobStore;
use slam_live::services::oracle::{Observation, OracleError, OracleFactory, TrackingOracle};
use slam_live::services::processing::ProcessingService;

use crate::fixtures::SETTINGS_TEMPLATE;

/// What the scripted tracker does on a given frame
#[derive(Debug, Clone)]
pub enum Step {
    /// Track successfully with this many points
    Track(usize),
    /// Track successfully, re-observing the same points every frame
    TrackStatic(usize),
    /// Report tracking loss
    Lost,
    /// Return an error from `track`
    Fail(String),
    /// Panic inside `track`
    Panic,
    /// Block inside `track` until the gate opens, then track 20 points.
    /// Fails if the gate stays shut for two seconds.
    WaitForGate(Arc<Gate>),
}

/// A one-shot latch a scripted tracker can block on
#[derive(Debug, Default)]
pub struct Gate {
    open: Mutex<bool>,
    opened: Condvar,
}

impl Gate {
    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.opened.notify_all();
    }

    pub fn wait(&self, timeout: Duration) -> bool {
        let guard = self.open.lock().unwrap();
        let (guard, _) = self
            .opened
            .wait_timeout_while(guard, timeout, |open| !*open)
            .unwrap();
        *guard
    }
}

type Script = Arc<dyn Fn(u64) -> Step + Send + Sync>;

/// Points tracked on `frame`, unique per (frame, index) and in front of an
/// identity camera.
pub fn frame_points(frame: u64, count: usize) -> Vec<Point3> {
    (0..count)
        .map(|i| Point3::new(0.001 * i as f64, 0.001 * frame as f64, 3.0))
        .collect()
}

/// Videos known to the scripted decoder, keyed by path
#[derive(Default)]
pub struct ScriptedDecoder {
    videos: Mutex<HashMap<PathBuf, VideoMetadata>>,
    pub releases: Arc<AtomicUsize>,
}

impl ScriptedDecoder {
    pub fn add(&self, path: impl Into<PathBuf>, metadata: VideoMetadata) {
        self.videos.lock().unwrap().insert(path.into(), metadata);
    }
}

impl VideoDecoder for ScriptedDecoder {
    fn inspect(&self, path: &Path) -> Result<VideoMetadata, FrameSourceError> {
        self.videos
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .ok_or_else(|| FrameSourceError::NotFound(path.to_path_buf()))
    }

    fn open(
        &self,
        _path: &Path,
        metadata: &VideoMetadata,
    ) -> Result<Box<dyn FrameSource>, FrameSourceError> {
        Ok(Box::new(ScriptedFrames {
            remaining: metadata.total_frames,
            width: metadata.width,
            height: metadata.height,
            releases: self.releases.clone(),
            released: false,
        }))
    }
}

struct ScriptedFrames {
    remaining: u64,
    width: u32,
    height: u32,
    releases: Arc<AtomicUsize>,
    released: bool,
}

impl FrameSource for ScriptedFrames {
    fn next_frame(&mut self) -> Result<Option<GrayImage>, FrameSourceError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        Ok(Some(GrayImage::new(self.width, self.height)))
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Tracker factory whose trackers follow a per-frame script
pub struct ScriptedOracleFactory {
    script: Script,
    init_error: Option<String>,
    pub inits: Arc<AtomicUsize>,
    pub shutdowns: Arc<AtomicUsize>,
    pub settings_seen: Arc<Mutex<Vec<PathBuf>>>,
    pub timestamps: Arc<Mutex<Vec<f64>>>,
}

impl ScriptedOracleFactory {
    pub fn new(script: impl Fn(u64) -> Step + Send + Sync + 'static) -> Self {
        Self {
            script: Arc::new(script),
            init_error: None,
            inits: Arc::default(),
            shutdowns: Arc::default(),
            settings_seen: Arc::default(),
            timestamps: Arc::default(),
        }
    }

    pub fn failing_init(reason: &str) -> Self {
        Self {
            init_error: Some(reason.to_string()),
            ..Self::new(|_| Step::Lost)
        }
    }
}

impl OracleFactory for ScriptedOracleFactory {
    fn init(&self, settings: &Path) -> Result<Box<dyn TrackingOracle>, OracleError> {
        assert!(settings.exists(), "settings must exist while the tracker starts");
        self.settings_seen.lock().unwrap().push(settings.to_path_buf());
        if let Some(reason) = &self.init_error {
            return Err(OracleError::Init(reason.clone()));
        }
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedOracle {
            script: self.script.clone(),
            frame: 0,
            shutdowns: self.shutdowns.clone(),
            timestamps: self.timestamps.clone(),
            shut_down: false,
        }))
    }
}

struct ScriptedOracle {
    script: Script,
    frame: u64,
    shutdowns: Arc<AtomicUsize>,
    timestamps: Arc<Mutex<Vec<f64>>>,
    shut_down: bool,
}

impl TrackingOracle for ScriptedOracle {
    fn track(
        &mut self,
        _frame: &GrayImage,
        timestamp: f64,
    ) -> Result<Option<Observation>, OracleError> {
        let frame = self.frame;
        self.frame += 1;
        self.timestamps.lock().unwrap().push(timestamp);

        let points = match (self.script)(frame) {
            Step::Track(count) => frame_points(frame, count),
            Step::TrackStatic(count) => frame_points(0, count),
            Step::Lost => return Ok(None),
            Step::Fail(reason) => return Err(OracleError::Protocol(reason)),
            Step::Panic => panic!("tracker crashed on frame {frame}"),
            Step::WaitForGate(gate) => {
                if !gate.wait(Duration::from_secs(2)) {
                    return Err(OracleError::Protocol("tracker stalled".to_string()));
                }
                frame_points(frame, 20)
            }
        };

        let mut pose = Pose::identity();
        pose.0[(0, 3)] = frame as f64 * 0.01;
        Ok(Some(Observation {
            pose,
            points,
            keypoints: vec![Point2::new(1.0, 1.0)],
        }))
    }

    fn shutdown(&mut self) {
        if !self.shut_down {
            self.shut_down = true;
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Scratch directory with a settings template, removed on drop
pub struct TestEnv {
    pub root: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let root = std::env::temp_dir().join(format!("slam-live-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("settings.yaml"), SETTINGS_TEMPLATE).unwrap();
        Self { root }
    }

    pub fn synthesizer(&self) -> CameraConfigSynthesizer {
        CameraConfigSynthesizer::new(self.root.join("settings.yaml"), self.artifact_dir())
    }

    pub fn artifact_dir(&self) -> PathBuf {
        self.root.join("generated")
    }

    /// Settings files currently left in the artifact directory
    pub fn leftover_artifacts(&self) -> usize {
        std::fs::read_dir(self.artifact_dir())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

/// A processing service wired to scripted collaborators
pub struct Harness {
    pub env: TestEnv,
    pub store: Arc<JobStore>,
    pub decoder: Arc<ScriptedDecoder>,
    pub oracles: Arc<ScriptedOracleFactory>,
    pub service: ProcessingService,
}

impl Harness {
    pub fn new(oracles: ScriptedOracleFactory) -> Self {
        let env = TestEnv::new();
        let store = Arc::new(JobStore::new());
        let decoder = Arc::new(ScriptedDecoder::default());
        let oracles = Arc::new(oracles);
        let service = ProcessingService::new(
            store.clone(),
            decoder.clone(),
            oracles.clone(),
            env.synthesizer(),
        );
        Self {
            env,
            store,
            decoder,
            oracles,
            service,
        }
    }

    /// Register a video with the decoder and create a queued job for it.
    pub async fn queue_video(&self, name: &str, metadata: VideoMetadata) -> JobId {
        let path = self.env.root.join(name);
        self.decoder.add(&path, metadata);
        self.queue_path(&path).await
    }

    pub async fn queue_path(&self, path: &Path) -> JobId {
        self.store
            .create(
                JobKind::VideoProcessing,
                JobAttributes {
                    video_path: Some(path.to_string_lossy().into_owned()),
                    ..Default::default()
                },
            )
            .await
            .id
    }
}
