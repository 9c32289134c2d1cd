use axum::routing::get;
use axum::Router;

use crate::handlers::presence;
use crate::state::AppState;

/// Presence routes mounted at `/boards`.
///
/// ```text
/// GET    /{board_id}/presence                 -> get_board_presence
/// POST   /{board_id}/presence                 -> join_board_presence
/// PATCH  /{board_id}/presence                 -> update_presence
/// DELETE /{board_id}/presence                 -> leave_board_presence
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route(
        "/{board_id}/presence",
        get(presence::get_board_presence)
            .post(presence::join_board_presence)
            .patch(presence::update_presence)
            .delete(presence::leave_board_presence),
    )
}
