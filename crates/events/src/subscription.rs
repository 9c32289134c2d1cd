//! Live stream of a game's channels.

use tabletop_store::Subscription;

use crate::message::ChannelMessage;

/// Merged live view of a game's event and chat channels.
///
/// Only messages published after the subscription was opened are delivered.
/// Dropping it unsubscribes from both channels.
pub struct EventSubscription {
    game_id: String,
    events: Subscription,
    chat: Subscription,
    events_open: bool,
    chat_open: bool,
}

impl EventSubscription {
    pub(crate) fn new(game_id: &str, events: Subscription, chat: Subscription) -> Self {
        Self {
            game_id: game_id.to_string(),
            events,
            chat,
            events_open: true,
            chat_open: true,
        }
    }

    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    /// Wait for the next message on either channel.
    ///
    /// Payloads that fail to decode are logged and skipped. Returns `None`
    /// once both channels are closed.
    pub async fn recv(&mut self) -> Option<ChannelMessage> {
        loop {
            let payload = tokio::select! {
                payload = self.events.recv(), if self.events_open => match payload {
                    Some(payload) => payload,
                    None => {
                        self.events_open = false;
                        continue;
                    }
                },
                payload = self.chat.recv(), if self.chat_open => match payload {
                    Some(payload) => payload,
                    None => {
                        self.chat_open = false;
                        continue;
                    }
                },
                else => return None,
            };

            match serde_json::from_str(&payload) {
                Ok(message) => return Some(message),
                Err(e) => {
                    tracing::warn!(game_id = %self.game_id, error = %e, "Dropping undecodable channel message");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
