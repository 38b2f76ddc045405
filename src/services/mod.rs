pub mod camera_config;
pub mod ffmpeg;
pub mod frame_source;
pub mod job_store;
pub mod live;
pub mod map_accumulator;
pub mod oracle;
pub mod processing;
pub mod projector;
pub mod storage;
pub mod tracker_process;
