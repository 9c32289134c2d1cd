//! Shared response envelope for API handlers.
//!
//! Successful and logically-failed operations answer `200` with the
//! `{ "success", "data"?, "error"? }` envelope from [`ServiceResult`], so
//! clients branch on `success` for expected outcomes such as lock
//! contention. Infrastructure and request errors go through
//! [`AppError`](crate::error::AppError) instead.

use axum::Json;
use serde::Serialize;
use tabletop_core::result::ServiceResult;

/// Handler return type for envelope responses.
pub type ApiResponse<T> = Json<ServiceResult<T>>;

/// `{ "success": true, "data": T }`.
pub fn ok<T: Serialize>(data: T) -> ApiResponse<T> {
    Json(ServiceResult::ok(data))
}

/// Success when `succeeded`, otherwise a logical failure with `reason`.
/// The outcome is carried as `data` either way.
pub fn outcome<T: Serialize>(succeeded: bool, data: T, reason: &str) -> ApiResponse<T> {
    if succeeded {
        ok(data)
    } else {
        Json(ServiceResult::rejected_with(data, reason))
    }
}
