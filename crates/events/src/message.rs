//! Messages carried on game channels.

use serde::{Deserialize, Serialize};
use tabletop_core::types::{new_id, Timestamp, UserId};

/// Sender id used for system announcements.
pub const SYSTEM_USER_ID: &str = "system";

// ---------------------------------------------------------------------------
// GameEvent
// ---------------------------------------------------------------------------

/// Something that happened in a game session.
///
/// Constructed via [`GameEvent::new`] and enriched with
/// [`with_board`](GameEvent::with_board) and
/// [`with_payload`](GameEvent::with_payload). Immutable once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    pub id: String,

    /// Dot-separated event name, e.g. `"piece.moved"`.
    pub event_type: String,

    pub game_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_id: Option<String>,

    pub user_id: UserId,

    pub payload: serde_json::Value,

    pub timestamp: Timestamp,
}

impl GameEvent {
    /// Create an event with a fresh id and an empty object payload.
    pub fn new(
        game_id: impl Into<String>,
        event_type: impl Into<String>,
        user_id: impl Into<UserId>,
    ) -> Self {
        Self {
            id: new_id(),
            event_type: event_type.into(),
            game_id: game_id.into(),
            board_id: None,
            user_id: user_id.into(),
            payload: serde_json::Value::Object(Default::default()),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn with_board(mut self, board_id: impl Into<String>) -> Self {
        self.board_id = Some(board_id.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// ChatMessage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMessageType {
    Text,
    Emote,
    System,
}

/// A chat line in a game session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub game_id: String,
    pub user_id: UserId,
    pub username: String,
    pub message: String,
    #[serde(rename = "type")]
    pub message_type: ChatMessageType,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub timestamp: Timestamp,
}

impl ChatMessage {
    pub fn text(
        game_id: impl Into<String>,
        user_id: impl Into<UserId>,
        username: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            game_id: game_id.into(),
            user_id: user_id.into(),
            username: username.into(),
            message: message.into(),
            message_type: ChatMessageType::Text,
            metadata: serde_json::Map::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    /// A message from the platform itself rather than a participant.
    pub fn announcement(game_id: impl Into<String>, text: impl Into<String>) -> Self {
        let mut message = Self::text(game_id, SYSTEM_USER_ID, "System", text);
        message.message_type = ChatMessageType::System;
        message
    }

    pub fn with_type(mut self, message_type: ChatMessageType) -> Self {
        self.message_type = message_type;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

// ---------------------------------------------------------------------------
// ChannelMessage
// ---------------------------------------------------------------------------

/// Wire envelope published on game channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ChannelMessage {
    Event(GameEvent),
    Chat(ChatMessage),
}

impl ChannelMessage {
    pub fn id(&self) -> &str {
        match self {
            Self::Event(event) => &event.id,
            Self::Chat(message) => &message.id,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
