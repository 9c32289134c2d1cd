//! Route definitions for the job queue.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::queue;
use crate::state::AppState;

/// Queue routes mounted at `/queues`.
///
/// ```text
/// POST /{queue_name}/jobs                     -> add_job
/// POST /{queue_name}/next                     -> get_next_job
/// GET  /{queue_name}/stats                    -> get_queue_stats
/// ```
pub fn queue_router() -> Router<AppState> {
    Router::new()
        .route("/{queue_name}/jobs", post(queue::add_job))
        .route("/{queue_name}/next", post(queue::get_next_job))
        .route("/{queue_name}/stats", get(queue::get_queue_stats))
}

/// Job routes mounted at `/jobs`.
///
/// ```text
/// GET  /{job_id}                              -> get_job
/// POST /{job_id}/complete                     -> complete_job
/// POST /{job_id}/fail                         -> fail_job
/// ```
pub fn job_router() -> Router<AppState> {
    Router::new()
        .route("/{job_id}", get(queue::get_job))
        .route("/{job_id}/complete", post(queue::complete_job))
        .route("/{job_id}/fail", post(queue::fail_job))
}
