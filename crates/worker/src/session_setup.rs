//! Background half of session start.

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tabletop_core::coordination::session::READY_EVENT;
use tabletop_core::types::UserId;
use tabletop_events::{GameEvent, PubSubService};
use tabletop_queue::Job;

use crate::handler::JobHandler;

#[derive(Debug, Deserialize)]
struct SetupPayload {
    game_id: String,
    board_id: String,
    started_by: UserId,
}

/// Announces that a started session is ready for play.
///
/// Publishes `session.ready` on the game channel and a system chat line.
pub struct SessionSetupHandler {
    pubsub: PubSubService,
}

impl SessionSetupHandler {
    pub fn new(pubsub: PubSubService) -> Self {
        Self { pubsub }
    }
}

#[async_trait]
impl JobHandler for SessionSetupHandler {
    async fn handle(&self, job: &Job) -> anyhow::Result<Option<serde_json::Value>> {
        let payload: SetupPayload = serde_json::from_value(job.payload.clone())
            .context("session setup payload is malformed")?;

        let event = GameEvent::new(&payload.game_id, READY_EVENT, payload.started_by.as_str())
            .with_board(&payload.board_id)
            .with_payload(json!({ "setup_job_id": job.id }));
        let ready_event_id = self
            .pubsub
            .publish_game_event(event)
            .await
            .context("failed to publish session.ready")?;

        self.pubsub
            .publish_system_announcement(
                &payload.game_id,
                "Session is ready",
                serde_json::Map::new(),
            )
            .await
            .context("failed to announce session readiness")?;

        tracing::info!(
            game_id = %payload.game_id,
            board_id = %payload.board_id,
            job_id = %job.id,
            "Session setup finished"
        );
        Ok(Some(json!({ "ready_event_id": ready_event_id })))
    }
}
