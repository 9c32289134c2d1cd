//! Route definitions for distributed locks.
//!
//! Mutating endpoints act on behalf of the `x-user-id` caller.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::locks;
use crate::state::AppState;

/// Lock routes mounted at `/locks`.
///
/// ```text
/// POST /acquire                               -> acquire_lock
/// POST /release                               -> release_lock
/// POST /extend                                -> extend_lock
/// GET  /{lock_id}                             -> get_lock_status
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/acquire", post(locks::acquire_lock))
        .route("/release", post(locks::release_lock))
        .route("/extend", post(locks::extend_lock))
        .route("/{lock_id}", get(locks::get_lock_status))
}
