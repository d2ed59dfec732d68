use std::sync::Arc;

use crate::jobs::JobQueue;
use crate::repository::JobsRepo;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn JobsRepo>,
    pub queue: JobQueue,
    /// Language used when a request names none.
    pub default_language: String,
}
