//! Live update streams observed while jobs run

mod fixtures;
mod helpers;

use futures::StreamExt;
use std::time::Duration;

use fixtures::vga_video;
use helpers::{Harness, ScriptedOracleFactory, Step};
use slam_live::models::job::JobStatus;
use slam_live::services::live::{job_updates, LiveEvent};
use uuid::Uuid;

const POLL: Duration = Duration::from_millis(1);

fn status_rank(status: JobStatus) -> u8 {
    match status {
        JobStatus::Queued => 0,
        JobStatus::Initializing => 1,
        JobStatus::Processing => 2,
        JobStatus::Completed | JobStatus::CompletedWithWarnings | JobStatus::Failed => 3,
    }
}

#[tokio::test]
async fn test_running_job_streams_until_complete() {
    let harness = Harness::new(ScriptedOracleFactory::new(|_| Step::Track(20)));
    let id = harness.queue_video("walk.mp4", vga_video(30)).await;

    let events = job_updates(harness.store.clone(), id, POLL);
    let handle = harness.service.spawn(id);
    let events: Vec<LiveEvent> = tokio::time::timeout(Duration::from_secs(10), events.collect())
        .await
        .expect("stream ends once the job finishes");
    assert_eq!(handle.await.unwrap(), Some(JobStatus::Completed));

    assert!(events.len() >= 2);
    let (last, updates) = events.split_last().unwrap();
    assert!(updates.iter().all(|e| e.name() == "update"));

    let mut frames = 0;
    let mut rank = 0;
    for event in updates {
        let LiveEvent::Update(update) = event else {
            panic!("expected update, got {event:?}");
        };
        assert!(update.processed_frames >= frames);
        assert!(status_rank(update.status) >= rank);
        assert!((0.0..=100.0).contains(&update.progress));
        frames = update.processed_frames;
        rank = status_rank(update.status);
    }

    match last {
        LiveEvent::Final(done) => {
            assert_eq!(done.kind, "complete");
            assert_eq!(done.status, JobStatus::Completed);
            assert_eq!(done.processed_frames, 30);
            assert_eq!(done.trajectory.len(), 30);
        }
        other => panic!("expected final event, got {other:?}"),
    }
}

#[tokio::test]
async fn test_warning_job_ends_with_complete_event() {
    let harness = Harness::new(ScriptedOracleFactory::new(|_| Step::Lost));
    let id = harness.queue_video("dark.mp4", vga_video(200)).await;

    let handle = harness.service.spawn(id);
    let events: Vec<LiveEvent> = job_updates(harness.store.clone(), id, POLL).collect().await;
    handle.await.unwrap();

    let json = serde_json::to_value(events.last().unwrap()).unwrap();
    assert_eq!(json["type"], "complete");
    assert_eq!(json["status"], "completed_with_warnings");
    assert_eq!(json["warning"], "Tracking lost after frame 0");
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
}

#[tokio::test]
async fn test_failed_job_ends_with_error_event() {
    let harness = Harness::new(ScriptedOracleFactory::new(|_| Step::Track(20)));
    let id = harness.queue_path(&harness.env.root.join("gone.mp4")).await;

    let handle = harness.service.spawn(id);
    let events: Vec<LiveEvent> = job_updates(harness.store.clone(), id, POLL).collect().await;
    handle.await.unwrap();

    let json = serde_json::to_value(events.last().unwrap()).unwrap();
    assert_eq!(json["type"], "error");
    assert_eq!(json["status"], "failed");
    assert!(json["error"]
        .as_str()
        .is_some_and(|e| e.starts_with("Video file not found")));
}

#[tokio::test]
async fn test_unknown_job_yields_one_error() {
    let harness = Harness::new(ScriptedOracleFactory::new(|_| Step::Track(20)));
    let events: Vec<LiveEvent> = job_updates(harness.store.clone(), Uuid::new_v4(), POLL)
        .collect()
        .await;

    assert_eq!(events.len(), 1);
    let json = serde_json::to_value(&events[0]).unwrap();
    assert_eq!(json["type"], "error");
    assert_eq!(json["message"], "Processing not found");
}
