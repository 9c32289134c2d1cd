//! Handlers for game events, chat, and session start.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tabletop_core::coordination::{validate_id, EVENT_HISTORY_CAPACITY};
use tabletop_events::{BulkPublishReport, ChannelStats, ChatMessage, ChatMessageType, GameEvent};
use validator::Validate;

use crate::error::AppResult;
use crate::middleware::identity::Caller;
use crate::response::{ok, outcome, ApiResponse};
use crate::session::{self, SessionStart};
use crate::state::AppState;

/// Most events accepted by one bulk publish.
pub const MAX_BULK_EVENTS: usize = EVENT_HISTORY_CAPACITY;

/// `MAX_BULK_EVENTS` as the `u64` the validator's length bound expects.
const MAX_BULK_EVENTS_U64: u64 = MAX_BULK_EVENTS as u64;

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct PublishEventRequest {
    #[validate(length(min = 1, max = 128))]
    pub event_type: String,
    pub board_id: Option<String>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BulkPublishRequest {
    #[validate(length(min = 1, max = MAX_BULK_EVENTS_U64), nested)]
    pub events: Vec<PublishEventRequest>,
}

#[derive(Debug, Deserialize)]
pub struct PublishChatRequest {
    pub message: String,
    #[serde(rename = "type")]
    pub message_type: Option<ChatMessageType>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AnnouncementRequest {
    #[validate(length(min = 1, max = 2000))]
    pub text: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub board_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Published {
    pub id: String,
}

fn build_event(game_id: &str, caller: &Caller, input: PublishEventRequest) -> GameEvent {
    let mut event = GameEvent::new(game_id, input.event_type, caller.user_id.as_str());
    if let Some(board_id) = input.board_id {
        event = event.with_board(board_id);
    }
    if let Some(payload) = input.payload {
        event = event.with_payload(payload);
    }
    event
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// GET /api/v1/games/{game_id}/events?limit=
///
/// Most recent events, oldest first.
pub async fn get_recent_events(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> AppResult<ApiResponse<Vec<GameEvent>>> {
    let events = state.pubsub.get_recent_events(&game_id, params.limit).await?;
    Ok(ok(events))
}

/// POST /api/v1/games/{game_id}/events
pub async fn publish_event(
    caller: Caller,
    State(state): State<AppState>,
    Path(game_id): Path<String>,
    Json(input): Json<PublishEventRequest>,
) -> AppResult<ApiResponse<Published>> {
    input.validate()?;
    if let Some(board_id) = &input.board_id {
        validate_id("board_id", board_id)?;
    }
    let id = state
        .pubsub
        .publish_game_event(build_event(&game_id, &caller, input))
        .await?;
    Ok(ok(Published { id }))
}

/// POST /api/v1/games/{game_id}/events/bulk
///
/// Each event is published independently; a partial failure answers
/// `success: false` with the report listing what did and did not go out.
pub async fn publish_bulk_events(
    caller: Caller,
    State(state): State<AppState>,
    Path(game_id): Path<String>,
    Json(input): Json<BulkPublishRequest>,
) -> AppResult<ApiResponse<BulkPublishReport>> {
    input.validate()?;
    validate_id("game_id", &game_id)?;
    let events = input
        .events
        .into_iter()
        .map(|event| build_event(&game_id, &caller, event))
        .collect();
    let report = state.pubsub.publish_bulk_events(events).await;

    tracing::info!(
        game_id = %game_id,
        published = report.published.len(),
        failed = report.failed.len(),
        "Bulk publish finished"
    );
    Ok(outcome(
        report.is_complete(),
        report,
        "Some events were not published",
    ))
}

/// GET /api/v1/games/{game_id}/stats
pub async fn get_channel_stats(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
) -> AppResult<ApiResponse<ChannelStats>> {
    let stats = state.pubsub.get_channel_stats(&game_id).await?;
    Ok(ok(stats))
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// GET /api/v1/games/{game_id}/chat?limit=
pub async fn get_chat_history(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> AppResult<ApiResponse<Vec<ChatMessage>>> {
    let history = state.pubsub.get_chat_history(&game_id, params.limit).await?;
    Ok(ok(history))
}

/// POST /api/v1/games/{game_id}/chat
pub async fn publish_chat(
    caller: Caller,
    State(state): State<AppState>,
    Path(game_id): Path<String>,
    Json(input): Json<PublishChatRequest>,
) -> AppResult<ApiResponse<Published>> {
    let message = ChatMessage::text(
        game_id,
        caller.user_id.as_str(),
        caller.name(),
        input.message,
    )
    .with_type(match input.message_type {
        // Participants cannot impersonate the system.
        Some(ChatMessageType::System) | None => ChatMessageType::Text,
        Some(other) => other,
    });
    let id = state.pubsub.publish_chat_message(message).await?;
    Ok(ok(Published { id }))
}

/// POST /api/v1/games/{game_id}/announcements
pub async fn publish_announcement(
    caller: Caller,
    State(state): State<AppState>,
    Path(game_id): Path<String>,
    Json(input): Json<AnnouncementRequest>,
) -> AppResult<ApiResponse<Published>> {
    input.validate()?;
    let mut metadata = input.metadata;
    metadata.insert("announced_by".into(), caller.user_id.clone().into());
    let id = state
        .pubsub
        .publish_system_announcement(&game_id, &input.text, metadata)
        .await?;
    Ok(ok(Published { id }))
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// POST /api/v1/games/{game_id}/session/start
///
/// Returns 409 `SESSION_INITIALIZING` when another caller is already
/// starting this game, and 503 `STORE_UNAVAILABLE` when the store fails.
pub async fn start_session(
    caller: Caller,
    State(state): State<AppState>,
    Path(game_id): Path<String>,
    Json(input): Json<StartSessionRequest>,
) -> AppResult<ApiResponse<SessionStart>> {
    validate_id("game_id", &game_id)?;
    let board_id = input.board_id.unwrap_or_else(|| game_id.clone());
    validate_id("board_id", &board_id)?;

    let start = session::start_session(&state, &game_id, &board_id, &caller).await?;
    Ok(ok(start))
}
