use std::sync::Arc;
use std::time::Duration;

use crate::services::{
    job_store::JobStore, processing::ProcessingService, storage::UploadStorage,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<JobStore>,
    pub processing: ProcessingService,
    pub uploads: Arc<UploadStorage>,
    pub live_poll_interval: Duration,
}

impl AppState {
    pub fn new(
        processing: ProcessingService,
        uploads: UploadStorage,
        live_poll_interval: Duration,
    ) -> Self {
        Self {
            store: processing.store().clone(),
            processing,
            uploads: Arc::new(uploads),
            live_poll_interval,
        }
    }
}
