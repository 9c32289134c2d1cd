pub mod diagnostics;
pub mod games;
pub mod health;
pub mod locks;
pub mod presence;
pub mod queues;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /locks/acquire                                   acquire (POST)
/// /locks/release                                   release (POST)
/// /locks/extend                                    extend (POST)
/// /locks/{lock_id}                                 status
///
/// /boards/{board_id}/presence                      list, join, update, leave
///
/// /games/{game_id}/events                          recent events, publish
/// /games/{game_id}/events/bulk                     bulk publish (POST)
/// /games/{game_id}/chat                            chat history, send
/// /games/{game_id}/announcements                   system announcement (POST)
/// /games/{game_id}/stats                           channel counters
/// /games/{game_id}/session/start                   start session (POST)
///
/// /queues/{queue_name}/jobs                        enqueue (POST)
/// /queues/{queue_name}/next                        claim next job (POST)
/// /queues/{queue_name}/stats                       counts per state
/// /jobs/{job_id}                                   inspect
/// /jobs/{job_id}/complete                          complete (POST)
/// /jobs/{job_id}/fail                              fail (POST)
///
/// /diagnostics?feature=                            self-test
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Distributed locks.
        .nest("/locks", locks::router())
        // Board presence.
        .nest("/boards", presence::router())
        // Game events, chat, and session start.
        .nest("/games", games::router())
        // Job queues and individual jobs.
        .nest("/queues", queues::queue_router())
        .nest("/jobs", queues::job_router())
        // End-to-end self-test.
        .merge(diagnostics::router())
}
