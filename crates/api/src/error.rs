use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tabletop_coordination::LockError;
use tabletop_core::error::CoreError;
use tabletop_events::PubSubError;
use tabletop_queue::QueueError;
use tabletop_store::StoreError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and [`StoreError`] for
/// infrastructure failures, and adds HTTP-specific variants. Implements
/// [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `tabletop_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The shared store failed or was unreachable.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Another caller is already initializing the session.
    #[error("Session initializing: {0}")]
    SessionInitializing(String),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl From<LockError> for AppError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Invalid(core) => Self::Core(core),
            LockError::Store(store) => Self::Store(store),
        }
    }
}

impl From<PubSubError> for AppError {
    fn from(e: PubSubError) -> Self {
        match e {
            PubSubError::Invalid(core) => Self::Core(core),
            PubSubError::Store(store) => Self::Store(store),
        }
    }
}

impl From<QueueError> for AppError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Invalid(core) => Self::Core(core),
            QueueError::Store(store) => Self::Store(store),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Core(CoreError::Validation(errors.to_string()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Unauthorized(msg) => {
                    (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
                }
            },

            // --- Store errors ---
            AppError::Store(err) => classify_store_error(err),

            // --- HTTP-specific errors ---
            AppError::SessionInitializing(msg) => {
                (StatusCode::CONFLICT, "SESSION_INITIALIZING", msg.clone())
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Classify a store error into an HTTP status, error code, and message.
///
/// - Corrupt or mistyped data maps to 500 with a sanitized message.
/// - Everything else (connection loss, timeouts, command errors) maps to
///   503 so callers can degrade and retry.
fn classify_store_error(err: &StoreError) -> (StatusCode, &'static str, String) {
    match err {
        StoreError::Serialization(_) | StoreError::WrongType(_) | StoreError::InvalidResponse(_) => {
            tracing::error!(error = %err, "Store returned unusable data");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
        other => {
            tracing::error!(error = %other, "Store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "STORE_UNAVAILABLE",
                "The coordination store is unavailable".to_string(),
            )
        }
    }
}
