//! Handlers for distributed locks.
//!
//! The caller (from `x-user-id`) is always the holder: a caller can only
//! release or extend leases it acquired itself.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use tabletop_coordination::{
    LockAcquisition, LockExtension, LockOptions, LockRelease, LockStatus,
};
use tabletop_core::coordination::{
    validate_id, DEFAULT_LEASE_DURATION_MS, MAX_LEASE_DURATION_MS, MAX_LOCK_RETRY_ATTEMPTS,
    MAX_LOCK_RETRY_DELAY_MS, MIN_LEASE_DURATION_MS,
};
use validator::Validate;

use crate::error::AppResult;
use crate::middleware::identity::Caller;
use crate::response::{ok, outcome, ApiResponse};
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct AcquireLockRequest {
    pub lock_id: String,
    #[validate(range(min = MIN_LEASE_DURATION_MS, max = MAX_LEASE_DURATION_MS))]
    pub lease_duration_ms: Option<u64>,
    #[validate(range(max = MAX_LOCK_RETRY_ATTEMPTS))]
    pub retry_attempts: Option<u32>,
    #[validate(range(max = MAX_LOCK_RETRY_DELAY_MS))]
    pub retry_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseLockRequest {
    pub lock_id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ExtendLockRequest {
    pub lock_id: String,
    #[validate(range(min = 1, max = MAX_LEASE_DURATION_MS))]
    pub additional_time_ms: u64,
}

/// POST /api/v1/locks/acquire
///
/// Attempt to take the lease on `lock_id`. Contention is a logical failure
/// (`success: false`, `data.acquired: false`), not an HTTP error.
pub async fn acquire_lock(
    caller: Caller,
    State(state): State<AppState>,
    Json(input): Json<AcquireLockRequest>,
) -> AppResult<ApiResponse<LockAcquisition>> {
    input.validate()?;
    validate_id("lock_id", &input.lock_id)?;

    let options = LockOptions {
        lease_duration_ms: input.lease_duration_ms.unwrap_or(DEFAULT_LEASE_DURATION_MS),
        retry_attempts: input.retry_attempts.unwrap_or(0),
        retry_delay_ms: input.retry_delay_ms.unwrap_or(0),
    };
    let acquisition = state
        .locks
        .acquire_lock(&input.lock_id, &caller.user_id, &options)
        .await?;

    if acquisition.acquired {
        tracing::info!(lock_id = %input.lock_id, user_id = %caller.user_id, "Lock acquired");
    }
    Ok(outcome(
        acquisition.acquired,
        acquisition,
        "Lock is held by another holder",
    ))
}

/// POST /api/v1/locks/release
pub async fn release_lock(
    caller: Caller,
    State(state): State<AppState>,
    Json(input): Json<ReleaseLockRequest>,
) -> AppResult<ApiResponse<LockRelease>> {
    validate_id("lock_id", &input.lock_id)?;

    let release = state
        .locks
        .release_lock(&input.lock_id, &caller.user_id)
        .await?;

    if release.released {
        tracing::info!(lock_id = %input.lock_id, user_id = %caller.user_id, "Lock released");
    }
    Ok(outcome(
        release.released,
        release,
        "You do not hold this lock",
    ))
}

/// POST /api/v1/locks/extend
pub async fn extend_lock(
    caller: Caller,
    State(state): State<AppState>,
    Json(input): Json<ExtendLockRequest>,
) -> AppResult<ApiResponse<LockExtension>> {
    input.validate()?;
    validate_id("lock_id", &input.lock_id)?;

    let extension = state
        .locks
        .extend_lock(
            &input.lock_id,
            &caller.user_id,
            Duration::from_millis(input.additional_time_ms),
        )
        .await?;

    Ok(outcome(
        extension.extended,
        extension,
        "You do not hold this lock",
    ))
}

/// GET /api/v1/locks/{lock_id}
pub async fn get_lock_status(
    State(state): State<AppState>,
    Path(lock_id): Path<String>,
) -> AppResult<ApiResponse<LockStatus>> {
    validate_id("lock_id", &lock_id)?;
    let status = state.locks.get_lock_status(&lock_id).await?;
    Ok(ok(status))
}
