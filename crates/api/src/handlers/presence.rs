//! Handlers for board presence.
//!
//! A caller joins, updates, and leaves only its own entry; anyone may list
//! a board's roster.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tabletop_coordination::{
    ParticipantProfile, PresenceEntry, PresenceLeave, PresenceUpdate, RoleInfo,
};
use tabletop_core::coordination::{roles, statuses, validate_id};
use tabletop_core::error::CoreError;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::middleware::identity::Caller;
use crate::response::{ok, outcome, ApiResponse};
use crate::state::AppState;

const KNOWN_ROLES: &[&str] = &[roles::PLAYER, roles::SPECTATOR, roles::MODERATOR, roles::HOST];
const KNOWN_STATUSES: &[&str] = &[statuses::ONLINE, statuses::AWAY, statuses::BUSY];

#[derive(Debug, Deserialize, Validate)]
pub struct JoinPresenceRequest {
    #[validate(length(min = 1, max = 64))]
    pub display_name: Option<String>,
    pub role: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePresenceRequest {
    pub status: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct PresenceJoined {
    pub participant_id: String,
    pub ttl_secs: u64,
}

fn ensure_known(kind: &str, value: &str, known: &[&str]) -> Result<(), AppError> {
    if known.contains(&value) {
        Ok(())
    } else {
        Err(AppError::Core(CoreError::Validation(format!(
            "Unknown {kind} '{value}'; expected one of {}",
            known.join(", ")
        ))))
    }
}

/// GET /api/v1/boards/{board_id}/presence
pub async fn get_board_presence(
    State(state): State<AppState>,
    Path(board_id): Path<String>,
) -> AppResult<ApiResponse<HashMap<String, PresenceEntry>>> {
    validate_id("board_id", &board_id)?;
    let roster = state.presence.get_board_presence(&board_id).await?;
    Ok(ok(roster))
}

/// POST /api/v1/boards/{board_id}/presence
///
/// Join (or re-join) the board as the caller. Re-joining overwrites the
/// profile and refreshes the TTL.
pub async fn join_board_presence(
    caller: Caller,
    State(state): State<AppState>,
    Path(board_id): Path<String>,
    Json(input): Json<JoinPresenceRequest>,
) -> AppResult<ApiResponse<PresenceJoined>> {
    input.validate()?;
    validate_id("board_id", &board_id)?;
    let role = input.role.unwrap_or_else(|| roles::PLAYER.to_string());
    ensure_known("role", &role, KNOWN_ROLES)?;

    let profile = ParticipantProfile {
        display_name: input
            .display_name
            .unwrap_or_else(|| caller.name().to_string()),
        metadata: input.metadata,
    };
    let join = state
        .presence
        .join_board_presence(
            &board_id,
            &caller.user_id,
            profile,
            RoleInfo {
                role,
                permissions: input.permissions,
            },
        )
        .await?;

    Ok(ok(PresenceJoined {
        participant_id: join.participant_id,
        ttl_secs: state.presence.ttl().as_secs(),
    }))
}

/// PATCH /api/v1/boards/{board_id}/presence
///
/// Refresh the caller's entry. An expired entry is not resurrected.
pub async fn update_presence(
    caller: Caller,
    State(state): State<AppState>,
    Path(board_id): Path<String>,
    Json(input): Json<UpdatePresenceRequest>,
) -> AppResult<ApiResponse<PresenceUpdate>> {
    validate_id("board_id", &board_id)?;
    if let Some(status) = &input.status {
        ensure_known("status", status, KNOWN_STATUSES)?;
    }

    let update = state
        .presence
        .update_user_presence(
            &board_id,
            &caller.user_id,
            input.status.as_deref(),
            input.metadata,
        )
        .await?;

    Ok(outcome(
        update.updated,
        update,
        "Presence entry has expired; join the board again",
    ))
}

/// DELETE /api/v1/boards/{board_id}/presence
pub async fn leave_board_presence(
    caller: Caller,
    State(state): State<AppState>,
    Path(board_id): Path<String>,
) -> AppResult<ApiResponse<PresenceLeave>> {
    validate_id("board_id", &board_id)?;
    let leave = state
        .presence
        .leave_board_presence(&board_id, &caller.user_id)
        .await?;
    Ok(outcome(leave.left, leave, "Not present on this board"))
}
