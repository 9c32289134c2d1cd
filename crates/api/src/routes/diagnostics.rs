use axum::routing::get;
use axum::Router;

use crate::handlers::diagnostics;
use crate::state::AppState;

/// Diagnostics route, merged into `/api/v1`.
///
/// ```text
/// GET /diagnostics?feature=                   -> run_diagnostics
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/diagnostics", get(diagnostics::run_diagnostics))
}
