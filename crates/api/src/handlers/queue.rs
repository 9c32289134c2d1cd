//! Handlers for the job queue.
//!
//! Consumers claim with `POST .../next` and settle with `complete` or
//! `fail`. Settling a job that is no longer active (already settled, or
//! recovered after stalling) is a logical failure, not an HTTP error.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tabletop_core::coordination::{validate_id, DEFAULT_MAX_ATTEMPTS, MAX_MAX_ATTEMPTS};
use tabletop_core::error::CoreError;
use tabletop_queue::{Job, JobCompletion, JobFailure, JobOptions, QueueStats};
use validator::Validate;

use crate::error::AppResult;
use crate::middleware::identity::Caller;
use crate::response::{ok, outcome, ApiResponse};
use crate::state::AppState;

/// Longest accepted initial delay (one day).
const MAX_DELAY_MS: u64 = 86_400_000;

#[derive(Debug, Deserialize, Validate)]
pub struct AddJobRequest {
    #[validate(length(min = 1, max = 128))]
    pub job_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub priority: Option<i32>,
    #[validate(range(max = MAX_DELAY_MS))]
    pub delay_ms: Option<u64>,
    #[validate(range(min = 1, max = MAX_MAX_ATTEMPTS))]
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct CompleteJobRequest {
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct FailJobRequest {
    #[validate(length(min = 1, max = 2000))]
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct JobEnqueued {
    pub job_id: String,
}

/// POST /api/v1/queues/{queue_name}/jobs
pub async fn add_job(
    caller: Caller,
    State(state): State<AppState>,
    Path(queue_name): Path<String>,
    Json(input): Json<AddJobRequest>,
) -> AppResult<ApiResponse<JobEnqueued>> {
    input.validate()?;

    let options = JobOptions {
        priority: input.priority.unwrap_or(0),
        delay_ms: 0,
        max_attempts: input.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
    }
    .delayed(Duration::from_millis(input.delay_ms.unwrap_or(0)));

    let job_id = state
        .queue
        .add_job(&queue_name, &input.job_type, input.payload, options)
        .await?;

    tracing::debug!(queue = %queue_name, job_id = %job_id, user_id = %caller.user_id, "Job enqueued via API");
    Ok(ok(JobEnqueued { job_id }))
}

/// POST /api/v1/queues/{queue_name}/next
///
/// Claim the highest-priority ready job. An empty queue answers
/// `success: false` with no data.
pub async fn get_next_job(
    _caller: Caller,
    State(state): State<AppState>,
    Path(queue_name): Path<String>,
) -> AppResult<ApiResponse<Option<Job>>> {
    validate_id("queue_name", &queue_name)?;
    let job = state.queue.get_next_job(&queue_name).await?;
    let claimed = job.is_some();
    Ok(outcome(claimed, job, "No job ready"))
}

/// GET /api/v1/queues/{queue_name}/stats
pub async fn get_queue_stats(
    State(state): State<AppState>,
    Path(queue_name): Path<String>,
) -> AppResult<ApiResponse<QueueStats>> {
    let stats = state.queue.get_queue_stats(&queue_name).await?;
    Ok(ok(stats))
}

/// GET /api/v1/jobs/{job_id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<ApiResponse<Job>> {
    validate_id("job_id", &job_id)?;
    let job = state
        .queue
        .get_job(&job_id)
        .await?
        .ok_or_else(|| CoreError::NotFound {
            entity: "Job",
            id: job_id.clone(),
        })?;
    Ok(ok(job))
}

/// POST /api/v1/jobs/{job_id}/complete
pub async fn complete_job(
    _caller: Caller,
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(input): Json<CompleteJobRequest>,
) -> AppResult<ApiResponse<JobCompletion>> {
    validate_id("job_id", &job_id)?;
    let completion = state.queue.complete_job(&job_id, input.result).await?;
    Ok(outcome(
        completion.completed,
        completion,
        "Job is not active",
    ))
}

/// POST /api/v1/jobs/{job_id}/fail
pub async fn fail_job(
    _caller: Caller,
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(input): Json<FailJobRequest>,
) -> AppResult<ApiResponse<JobFailure>> {
    input.validate()?;
    validate_id("job_id", &job_id)?;
    let failure = state.queue.fail_job(&job_id, &input.reason).await?;
    Ok(outcome(failure.failed, failure, "Job is not active"))
}
