//! Caller identity extractor.
//!
//! Authentication happens upstream (gateway or session layer); by the time
//! a request reaches this service it carries the resolved caller in the
//! `x-user-id` header and, optionally, a display name in `x-user-name`.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use tabletop_core::coordination::validate_id;
use tabletop_core::error::CoreError;

use crate::error::AppError;
use crate::state::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";

/// The caller on whose behalf the request acts.
///
/// Use this as an extractor parameter in any handler that needs to know
/// who is acting:
///
/// ```ignore
/// async fn my_handler(caller: Caller) -> AppResult<Json<()>> {
///     tracing::info!(user_id = %caller.user_id, "handling request");
///     Ok(Json(()))
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
    pub display_name: Option<String>,
}

impl Caller {
    /// Display name, falling back to the user id.
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.user_id)
    }
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                AppError::Core(CoreError::Unauthorized(format!(
                    "Missing {USER_ID_HEADER} header"
                )))
            })?;

        validate_id("user id", user_id)
            .map_err(|_| AppError::Core(CoreError::Unauthorized("Malformed user id".into())))?;

        let display_name = parts
            .headers
            .get(USER_NAME_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        Ok(Caller {
            user_id: user_id.to_string(),
            display_name,
        })
    }
}
