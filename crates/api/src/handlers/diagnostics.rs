//! Handler for the coordination self-test.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tabletop_core::result::ServiceResult;

use crate::diagnostics::{self, DiagnosticReport, Feature, OverallStatus};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DiagnosticsParams {
    pub feature: Option<String>,
}

/// GET /api/v1/diagnostics?feature=locks|presence|pubsub|queue|integration|all
///
/// Answers 200 when the checks ran (even if some failed, see `status`) and
/// 503 when the store was unreachable.
pub async fn run_diagnostics(
    State(state): State<AppState>,
    Query(params): Query<DiagnosticsParams>,
) -> AppResult<(StatusCode, Json<ServiceResult<DiagnosticReport>>)> {
    let feature = match params.feature.as_deref() {
        None => Feature::All,
        Some(raw) => raw.parse::<Feature>().map_err(AppError::BadRequest)?,
    };

    let report = diagnostics::run(&state, feature).await;
    let response = match report.status {
        OverallStatus::Passed => (StatusCode::OK, Json(ServiceResult::ok(report))),
        OverallStatus::Partial => (
            StatusCode::OK,
            Json(ServiceResult::rejected_with(report, "Some diagnostic checks failed")),
        ),
        OverallStatus::Failed => {
            let reason = report
                .error
                .clone()
                .unwrap_or_else(|| "Diagnostics could not run".to_string());
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ServiceResult::unavailable_with(report, reason)),
            )
        }
    };
    Ok(response)
}
