//! Session-start use case.
//!
//! Starting a game session composes every coordination service:
//!
//! 1. take the session lock so concurrent starters serialize,
//! 2. register the starter's presence on the board as host,
//! 3. publish `session.started` on the game channel,
//! 4. enqueue a `session.setup` background job.
//!
//! Losing the lock race is reported as [`AppError::SessionInitializing`]
//! (retry later); a store failure is reported as [`AppError::Store`]
//! (degraded). Presence is advisory, so a presence failure is logged and the
//! session starts without it.

use serde::Serialize;
use serde_json::json;
use tabletop_coordination::{LockOptions, LockedCallError, ParticipantProfile, RoleInfo};
use tabletop_core::coordination::{roles, session as session_names};
use tabletop_events::GameEvent;
use tabletop_queue::JobOptions;

use crate::error::{AppError, AppResult};
use crate::middleware::identity::Caller;
use crate::state::AppState;

/// Lease for the session lock; generous enough for the four steps.
pub const SESSION_LOCK_LEASE_MS: u64 = 10_000;

/// Event type published when a session starts.
pub const SESSION_STARTED_EVENT: &str = session_names::STARTED_EVENT;

/// Job type enqueued for background setup.
pub const SESSION_SETUP_JOB: &str = session_names::SETUP_JOB;

/// Priority of setup jobs relative to other work on the same queue.
const SESSION_SETUP_PRIORITY: i32 = 10;

#[derive(Debug, Clone, Serialize)]
pub struct SessionStart {
    pub game_id: String,
    pub board_id: String,
    pub started_by: String,
    pub presence_registered: bool,
    pub event_id: String,
    pub setup_job_id: String,
}

/// Lock id guarding initialization of `game_id`.
pub fn session_lock_id(game_id: &str) -> String {
    format!("session:{game_id}")
}

/// Start the session of `game_id` on `board_id` on behalf of `caller`.
pub async fn start_session(
    state: &AppState,
    game_id: &str,
    board_id: &str,
    caller: &Caller,
) -> AppResult<SessionStart> {
    let lock_id = session_lock_id(game_id);
    let options = LockOptions::with_lease(SESSION_LOCK_LEASE_MS);

    let outcome = state
        .locks
        .try_with_lock(&lock_id, &options, || initialize(state, game_id, board_id, caller))
        .await;

    match outcome {
        Ok(start) => {
            tracing::info!(
                game_id,
                board_id,
                user_id = %caller.user_id,
                setup_job_id = %start.setup_job_id,
                "Session started"
            );
            Ok(start)
        }
        Err(LockedCallError::NotAcquired { .. }) => {
            tracing::info!(game_id, user_id = %caller.user_id, "Session start already in progress");
            Err(AppError::SessionInitializing(format!(
                "Session for game {game_id} is already being initialized"
            )))
        }
        Err(LockedCallError::Invalid(e)) => Err(AppError::Core(e)),
        Err(LockedCallError::Store(e)) => Err(AppError::Store(e)),
        Err(LockedCallError::Operation(e)) => Err(e),
        Err(LockedCallError::Panicked(message)) => Err(AppError::InternalError(format!(
            "Session initialization panicked: {message}"
        ))),
    }
}

async fn initialize(
    state: &AppState,
    game_id: &str,
    board_id: &str,
    caller: &Caller,
) -> AppResult<SessionStart> {
    let profile = ParticipantProfile {
        display_name: caller.name().to_string(),
        metadata: serde_json::Map::new(),
    };
    let role = RoleInfo {
        role: roles::HOST.to_string(),
        permissions: Vec::new(),
    };
    let presence_registered = match state
        .presence
        .join_board_presence(board_id, &caller.user_id, profile, role)
        .await
    {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(game_id, board_id, error = %e, "Presence unavailable, starting session without it");
            false
        }
    };

    let event = GameEvent::new(game_id, SESSION_STARTED_EVENT, caller.user_id.as_str())
        .with_board(board_id)
        .with_payload(json!({ "started_by": caller.user_id }));
    let event_id = state.pubsub.publish_game_event(event).await?;

    let setup_job_id = state
        .queue
        .add_job(
            &state.config.session_setup_queue,
            SESSION_SETUP_JOB,
            json!({
                "game_id": game_id,
                "board_id": board_id,
                "started_by": caller.user_id,
            }),
            JobOptions::priority(SESSION_SETUP_PRIORITY),
        )
        .await?;

    Ok(SessionStart {
        game_id: game_id.to_string(),
        board_id: board_id.to_string(),
        started_by: caller.user_id.clone(),
        presence_registered,
        event_id,
        setup_job_id,
    })
}
