//! Route definitions for game channels.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::games;
use crate::state::AppState;

/// Game routes mounted at `/games`.
///
/// ```text
/// GET  /{game_id}/events                      -> get_recent_events
/// POST /{game_id}/events                      -> publish_event
/// POST /{game_id}/events/bulk                 -> publish_bulk_events
/// GET  /{game_id}/chat                        -> get_chat_history
/// POST /{game_id}/chat                        -> publish_chat
/// POST /{game_id}/announcements               -> publish_announcement
/// GET  /{game_id}/stats                       -> get_channel_stats
/// POST /{game_id}/session/start               -> start_session
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/{game_id}/events",
            get(games::get_recent_events).post(games::publish_event),
        )
        .route("/{game_id}/events/bulk", post(games::publish_bulk_events))
        .route(
            "/{game_id}/chat",
            get(games::get_chat_history).post(games::publish_chat),
        )
        .route("/{game_id}/announcements", post(games::publish_announcement))
        .route("/{game_id}/stats", get(games::get_channel_stats))
        .route("/{game_id}/session/start", post(games::start_session))
}
