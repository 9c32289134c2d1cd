//! Publishing and polling game channels.
//!
//! Every game has two channels, `{prefix}:game:{id}:events` and
//! `{prefix}:game:{id}:chat`. Publishing a message:
//!
//! 1. prepends it to the channel's capped history list (newest
//!    [`EVENT_HISTORY_CAPACITY`] / [`CHAT_HISTORY_CAPACITY`] entries kept,
//!    list expires after [`HISTORY_RETENTION_SECS`] of inactivity),
//! 2. bumps the channel's lifetime counter,
//! 3. publishes a [`ChannelMessage`] to live subscribers.
//!
//! History is written before the broadcast so a subscriber that reacts to a
//! live message always finds it in history. The history write is the commit
//! point: once it succeeds the publish succeeds, and a failed counter bump
//! or broadcast is only logged, so callers never retry (and duplicate) a
//! stored message. A single caller's messages appear in history in publish
//! order; nothing is guaranteed across channels.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tabletop_core::coordination::{
    validate_id, CHAT_HISTORY_CAPACITY, DEFAULT_HISTORY_LIMIT, EVENT_HISTORY_CAPACITY,
    HISTORY_RETENTION_SECS,
};
use tabletop_core::error::CoreError;
use tabletop_core::keys::KeySpace;
use tabletop_store::{KeyValueStore, PubSubBroker, StoreResult};

use crate::error::PubSubResult;
use crate::message::{ChannelMessage, ChatMessage, GameEvent};
use crate::subscription::EventSubscription;

/// Longest chat line accepted, in characters.
pub const MAX_CHAT_MESSAGE_CHARS: usize = 2_000;

/// Lifetime message counts for a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub total_events: u64,
    pub total_messages: u64,
}

/// One event of a bulk publish that did not go out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkFailure {
    pub index: usize,
    pub event_id: String,
    pub error: String,
}

/// Outcome of [`PubSubService::publish_bulk_events`].
///
/// Events are published independently; `published` lists the ids that went
/// out, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkPublishReport {
    pub published: Vec<String>,
    pub failed: Vec<BulkFailure>,
}

impl BulkPublishReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Clone)]
pub struct PubSubService {
    store: Arc<dyn KeyValueStore>,
    broker: Arc<dyn PubSubBroker>,
    keys: KeySpace,
    event_capacity: usize,
    chat_capacity: usize,
    retention: Duration,
}

impl PubSubService {
    pub fn new(store: Arc<dyn KeyValueStore>, broker: Arc<dyn PubSubBroker>, keys: KeySpace) -> Self {
        Self {
            store,
            broker,
            keys,
            event_capacity: EVENT_HISTORY_CAPACITY,
            chat_capacity: CHAT_HISTORY_CAPACITY,
            retention: Duration::from_secs(HISTORY_RETENTION_SECS),
        }
    }

    /// Override the per-channel history bounds.
    pub fn with_history(mut self, event_capacity: usize, chat_capacity: usize, retention: Duration) -> Self {
        self.event_capacity = event_capacity.max(1);
        self.chat_capacity = chat_capacity.max(1);
        self.retention = retention;
        self
    }

    // -- publishing -----------------------------------------------------------

    /// Publish a game event. Returns its id.
    pub async fn publish_game_event(&self, event: GameEvent) -> PubSubResult<String> {
        validate_id("game_id", &event.game_id)?;
        if event.event_type.trim().is_empty() {
            return Err(CoreError::Validation("event_type must not be empty".into()).into());
        }

        let channel = self.keys.event_channel(&event.game_id);
        self.append(&channel, &serde_json::to_string(&event)?, self.event_capacity)
            .await?;
        let receivers = self
            .broadcast(&channel, &ChannelMessage::Event(event.clone()))
            .await;

        tracing::debug!(
            game_id = %event.game_id,
            event_id = %event.id,
            event_type = %event.event_type,
            receivers,
            "Game event published"
        );
        Ok(event.id)
    }

    /// Publish a chat line. Returns its id.
    pub async fn publish_chat_message(&self, message: ChatMessage) -> PubSubResult<String> {
        validate_id("game_id", &message.game_id)?;
        if message.message.trim().is_empty() {
            return Err(CoreError::Validation("message must not be empty".into()).into());
        }
        if message.message.chars().count() > MAX_CHAT_MESSAGE_CHARS {
            return Err(CoreError::Validation(format!(
                "message exceeds {MAX_CHAT_MESSAGE_CHARS} characters"
            ))
            .into());
        }

        let channel = self.keys.chat_channel(&message.game_id);
        self.append(&channel, &serde_json::to_string(&message)?, self.chat_capacity)
            .await?;
        self.broadcast(&channel, &ChannelMessage::Chat(message.clone()))
            .await;

        tracing::debug!(
            game_id = %message.game_id,
            message_id = %message.id,
            user_id = %message.user_id,
            "Chat message published"
        );
        Ok(message.id)
    }

    /// Post a system-authored line to a game's chat. Returns its id.
    pub async fn publish_system_announcement(
        &self,
        game_id: &str,
        text: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> PubSubResult<String> {
        let announcement = ChatMessage::announcement(game_id, text).with_metadata(metadata);
        let id = self.publish_chat_message(announcement).await?;
        tracing::info!(game_id, announcement_id = %id, "System announcement published");
        Ok(id)
    }

    /// Publish each event independently.
    ///
    /// A failure does not stop the batch; it is recorded in the report and
    /// the remaining events are still attempted.
    pub async fn publish_bulk_events(&self, events: Vec<GameEvent>) -> BulkPublishReport {
        let mut report = BulkPublishReport::default();
        for (index, event) in events.into_iter().enumerate() {
            let event_id = event.id.clone();
            match self.publish_game_event(event).await {
                Ok(id) => report.published.push(id),
                Err(e) => {
                    tracing::warn!(index, event_id = %event_id, error = %e, "Bulk event not published");
                    report.failed.push(BulkFailure {
                        index,
                        event_id,
                        error: e.to_string(),
                    });
                }
            }
        }
        report
    }

    // -- history --------------------------------------------------------------

    /// The most recent events of a game, oldest first.
    ///
    /// `limit` defaults to [`DEFAULT_HISTORY_LIMIT`] and is capped at the
    /// history capacity.
    pub async fn get_recent_events(&self, game_id: &str, limit: Option<usize>) -> PubSubResult<Vec<GameEvent>> {
        validate_id("game_id", game_id)?;
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, self.event_capacity);
        Ok(self.read_history(&self.keys.event_channel(game_id), limit).await?)
    }

    /// The most recent chat lines of a game, oldest first.
    pub async fn get_chat_history(&self, game_id: &str, limit: Option<usize>) -> PubSubResult<Vec<ChatMessage>> {
        validate_id("game_id", game_id)?;
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, self.chat_capacity);
        Ok(self.read_history(&self.keys.chat_channel(game_id), limit).await?)
    }

    /// Lifetime counts of events and chat lines published on a game.
    pub async fn get_channel_stats(&self, game_id: &str) -> PubSubResult<ChannelStats> {
        validate_id("game_id", game_id)?;
        let total_events = self
            .read_counter(&self.keys.channel_counter(&self.keys.event_channel(game_id)))
            .await?;
        let total_messages = self
            .read_counter(&self.keys.channel_counter(&self.keys.chat_channel(game_id)))
            .await?;
        Ok(ChannelStats {
            total_events,
            total_messages,
        })
    }

    // -- live -----------------------------------------------------------------

    /// Stream everything published on a game from now on.
    pub async fn subscribe_game(&self, game_id: &str) -> PubSubResult<EventSubscription> {
        validate_id("game_id", game_id)?;
        let events = self.broker.subscribe(&self.keys.event_channel(game_id)).await?;
        let chat = self.broker.subscribe(&self.keys.chat_channel(game_id)).await?;
        tracing::debug!(game_id, "Game subscription opened");
        Ok(EventSubscription::new(game_id, events, chat))
    }

    // -- internals ------------------------------------------------------------

    async fn append(&self, channel: &str, json: &str, capacity: usize) -> StoreResult<()> {
        self.store
            .list_push_capped(&self.keys.history(channel), json, capacity, Some(self.retention))
            .await?;
        if let Err(e) = self.bump_counter(channel).await {
            tracing::warn!(channel, error = %e, "Message stored but channel counter not updated");
        }
        Ok(())
    }

    async fn bump_counter(&self, channel: &str) -> StoreResult<()> {
        let counter = self.keys.channel_counter(channel);
        self.store.increment(&counter, 1).await?;
        self.store.expire(&counter, self.retention).await?;
        Ok(())
    }

    /// Fan `message` out to live subscribers. Returns the number of
    /// receivers; a failed broadcast counts as zero.
    async fn broadcast(&self, channel: &str, message: &ChannelMessage) -> u64 {
        let delivered = match serde_json::to_string(message) {
            Ok(payload) => self.broker.publish(channel, &payload).await,
            Err(e) => Err(e.into()),
        };
        delivered.unwrap_or_else(|e| {
            tracing::warn!(channel, error = %e, "Message stored but not delivered live");
            0
        })
    }

    async fn read_history<T: DeserializeOwned>(&self, channel: &str, limit: usize) -> StoreResult<Vec<T>> {
        let raw = self.store.list_range(&self.keys.history(channel), limit).await?;
        let mut entries: Vec<T> = raw
            .iter()
            .filter_map(|json| match serde_json::from_str(json) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(channel, error = %e, "Skipping malformed history entry");
                    None
                }
            })
            .collect();
        entries.reverse();
        Ok(entries)
    }

    async fn read_counter(&self, key: &str) -> StoreResult<u64> {
        Ok(match self.store.get(key).await? {
            Some(raw) => raw.parse::<u64>().unwrap_or_else(|_| {
                tracing::warn!(key, value = %raw, "Non-numeric channel counter");
                0
            }),
            None => 0,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PubSubError;
    use crate::message::ChatMessageType;
    use assert_matches::assert_matches;
    use serde_json::json;
    use tabletop_store::testing::FaultyStore;
    use tabletop_store::MemoryStore;

    fn service() -> PubSubService {
        let store = Arc::new(MemoryStore::new());
        PubSubService::new(store.clone(), store, KeySpace::new("test"))
    }

    #[tokio::test]
    async fn published_events_appear_in_history_in_order() {
        let pubsub = service();
        for n in 0..3 {
            pubsub
                .publish_game_event(GameEvent::new("g1", "turn.ended", "u1").with_payload(json!({ "n": n })))
                .await
                .unwrap();
        }

        let events = pubsub.get_recent_events("g1", None).await.unwrap();
        let order: Vec<i64> = events.iter().map(|e| e.payload["n"].as_i64().unwrap()).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn limit_returns_newest_window() {
        let pubsub = service();
        for n in 0..5 {
            pubsub
                .publish_game_event(GameEvent::new("g1", "tick", "u1").with_payload(json!({ "n": n })))
                .await
                .unwrap();
        }
        let events = pubsub.get_recent_events("g1", Some(2)).await.unwrap();
        let order: Vec<i64> = events.iter().map(|e| e.payload["n"].as_i64().unwrap()).collect();
        assert_eq!(order, vec![3, 4]);
    }

    #[tokio::test]
    async fn history_evicts_oldest_beyond_capacity() {
        let pubsub = service().with_history(3, 3, Duration::from_secs(60));
        for n in 0..5 {
            pubsub
                .publish_game_event(GameEvent::new("g1", "tick", "u1").with_payload(json!({ "n": n })))
                .await
                .unwrap();
        }
        let events = pubsub.get_recent_events("g1", Some(10)).await.unwrap();
        let order: Vec<i64> = events.iter().map(|e| e.payload["n"].as_i64().unwrap()).collect();
        assert_eq!(order, vec![2, 3, 4]);

        let stats = pubsub.get_channel_stats("g1").await.unwrap();
        assert_eq!(stats.total_events, 5);
    }

    #[tokio::test]
    async fn chat_and_announcements_share_chat_history() {
        let pubsub = service();
        pubsub
            .publish_chat_message(ChatMessage::text("g1", "u1", "ada", "gg"))
            .await
            .unwrap();
        pubsub
            .publish_system_announcement("g1", "Game paused", serde_json::Map::new())
            .await
            .unwrap();

        let history = pubsub.get_chat_history("g1", None).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].message_type, ChatMessageType::System);

        let stats = pubsub.get_channel_stats("g1").await.unwrap();
        assert_eq!(
            stats,
            ChannelStats {
                total_events: 0,
                total_messages: 2
            }
        );
    }

    #[tokio::test]
    async fn empty_chat_is_rejected() {
        let outcome = service()
            .publish_chat_message(ChatMessage::text("g1", "u1", "ada", "   "))
            .await;
        assert_matches!(outcome, Err(PubSubError::Invalid(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn bulk_publish_reports_partial_failure() {
        let pubsub = service();
        let good = GameEvent::new("g1", "card.drawn", "u1");
        let bad = GameEvent::new("g1", "", "u1");
        let bad_id = bad.id.clone();
        let also_good = GameEvent::new("g1", "card.played", "u1");

        let report = pubsub
            .publish_bulk_events(vec![good.clone(), bad, also_good.clone()])
            .await;

        assert_eq!(report.published, vec![good.id, also_good.id]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].index, 1);
        assert_eq!(report.failed[0].event_id, bad_id);
        assert!(!report.is_complete());
        assert_eq!(pubsub.get_recent_events("g1", None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn stored_event_succeeds_when_live_delivery_fails() {
        let store = FaultyStore::new();
        let pubsub = PubSubService::new(store.clone(), store.clone(), KeySpace::new("test"));
        store.fail("publish", ":events", 1);
        let id = pubsub
            .publish_game_event(GameEvent::new("g1", "dice.rolled", "u1"))
            .await
            .unwrap();

        let history = pubsub.get_recent_events("g1", None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, id);
        assert_eq!(pubsub.get_channel_stats("g1").await.unwrap().total_events, 1);
    }

    #[tokio::test]
    async fn bulk_publish_counts_undelivered_events_as_published() {
        let store = FaultyStore::new();
        let pubsub = PubSubService::new(store.clone(), store.clone(), KeySpace::new("test"));
        let first = GameEvent::new("g1", "a", "u1");
        let second = GameEvent::new("g1", "b", "u1");

        store.fail("publish", ":events", 1);
        let report = pubsub
            .publish_bulk_events(vec![first.clone(), second.clone()])
            .await;

        assert!(report.is_complete());
        assert_eq!(report.published, vec![first.id, second.id]);
        assert_eq!(pubsub.get_recent_events("g1", None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn chat_is_stored_when_live_delivery_fails() {
        let store = FaultyStore::new();
        let pubsub = PubSubService::new(store.clone(), store.clone(), KeySpace::new("test"));

        store.fail("publish", ":chat", 1);
        pubsub
            .publish_chat_message(ChatMessage::text("g1", "u1", "ada", "anyone there?"))
            .await
            .unwrap();

        assert_eq!(pubsub.get_chat_history("g1", None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_history_write_is_an_error() {
        let store = FaultyStore::new();
        let pubsub = PubSubService::new(store.clone(), store.clone(), KeySpace::new("test"));

        store.fail("list_push_capped", ":events", 1);
        assert_matches!(
            pubsub.publish_game_event(GameEvent::new("g1", "x", "u1")).await,
            Err(PubSubError::Store(_))
        );
        assert_eq!(pubsub.get_channel_stats("g1").await.unwrap().total_events, 0);
    }

    #[tokio::test]
    async fn games_do_not_share_history() {
        let pubsub = service();
        pubsub
            .publish_game_event(GameEvent::new("g1", "x", "u1"))
            .await
            .unwrap();
        assert!(pubsub.get_recent_events("g2", None).await.unwrap().is_empty());
    }
}
