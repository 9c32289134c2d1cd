//! Scripted checks per component.

use std::time::Duration;

use serde_json::json;
use tabletop_coordination::{LockOptions, ParticipantProfile, RoleInfo};
use tabletop_core::coordination::statuses;
use tabletop_events::{ChannelMessage, ChatMessage, GameEvent};
use tabletop_queue::{JobOptions, JobStatus, QueueService, RetryPolicy};

use super::{timed, CheckResult};
use crate::middleware::identity::Caller;
use crate::session;
use crate::state::AppState;

type Checks = Vec<(&'static str, u64, CheckResult)>;

fn ensure(condition: bool, message: impl Into<String>) -> Result<(), String> {
    if condition {
        Ok(())
    } else {
        Err(message.into())
    }
}

fn err(e: impl std::fmt::Display) -> String {
    e.to_string()
}

// ---------------------------------------------------------------------------
// Locks
// ---------------------------------------------------------------------------

pub(super) async fn locks(state: &AppState, run_id: &str) -> Checks {
    let lock_id = format!("diag:{run_id}:lock");
    vec![
        timed("acquire_and_release", async {
            let acquired = state
                .locks
                .acquire_lock(&lock_id, "diag-a", &LockOptions::with_lease(5_000))
                .await
                .map_err(err)?;
            ensure(acquired.acquired, "free lock was not acquired")?;
            let status = state.locks.get_lock_status(&lock_id).await.map_err(err)?;
            ensure(status.holder.as_deref() == Some("diag-a"), "status does not report holder")?;
            let released = state.locks.release_lock(&lock_id, "diag-a").await.map_err(err)?;
            ensure(released.released, "holder could not release")?;
            Ok("acquired, inspected, released".into())
        })
        .await,
        timed("contention", async {
            state
                .locks
                .acquire_lock(&lock_id, "diag-a", &LockOptions::with_lease(5_000))
                .await
                .map_err(err)?;
            let contender = state
                .locks
                .acquire_lock(&lock_id, "diag-b", &LockOptions::with_lease(5_000).retry(1, 10))
                .await
                .map_err(err)?;
            let foreign_release = state.locks.release_lock(&lock_id, "diag-b").await.map_err(err)?;
            state.locks.release_lock(&lock_id, "diag-a").await.map_err(err)?;
            ensure(!contender.acquired, "second holder acquired a held lock")?;
            ensure(!foreign_release.released, "non-holder released the lock")?;
            Ok("second holder refused".into())
        })
        .await,
        timed("extend", async {
            state
                .locks
                .acquire_lock(&lock_id, "diag-a", &LockOptions::with_lease(1_000))
                .await
                .map_err(err)?;
            let extension = state
                .locks
                .extend_lock(&lock_id, "diag-a", Duration::from_secs(5))
                .await
                .map_err(err)?;
            state.locks.release_lock(&lock_id, "diag-a").await.map_err(err)?;
            ensure(extension.extended, "holder could not extend")?;
            Ok("lease extended".into())
        })
        .await,
    ]
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

pub(super) async fn presence(state: &AppState, run_id: &str) -> Checks {
    let board_id = format!("diag:{run_id}:board");
    let profile = || ParticipantProfile {
        display_name: "Diagnostics".into(),
        metadata: serde_json::Map::new(),
    };
    vec![
        timed("idempotent_join", async {
            state
                .presence
                .join_board_presence(&board_id, "diag-p", profile(), RoleInfo::default())
                .await
                .map_err(err)?;
            state
                .presence
                .join_board_presence(&board_id, "diag-p", profile(), RoleInfo::default())
                .await
                .map_err(err)?;
            let roster = state.presence.get_board_presence(&board_id).await.map_err(err)?;
            ensure(roster.len() == 1, format!("expected 1 entry, found {}", roster.len()))?;
            Ok("one entry after two joins".into())
        })
        .await,
        timed("update_and_leave", async {
            let update = state
                .presence
                .update_user_presence(&board_id, "diag-p", Some(statuses::AWAY), serde_json::Map::new())
                .await
                .map_err(err)?;
            ensure(update.updated, "live entry was not updated")?;
            let leave = state
                .presence
                .leave_board_presence(&board_id, "diag-p")
                .await
                .map_err(err)?;
            ensure(leave.left, "entry was not removed")?;
            let stale = state
                .presence
                .update_user_presence(&board_id, "diag-p", None, serde_json::Map::new())
                .await
                .map_err(err)?;
            ensure(!stale.updated, "update succeeded after leave")?;
            Ok("updated, left, stale update refused".into())
        })
        .await,
    ]
}

// ---------------------------------------------------------------------------
// Pub/sub
// ---------------------------------------------------------------------------

pub(super) async fn pubsub(state: &AppState, run_id: &str) -> Checks {
    let game_id = format!("diag-{run_id}");
    vec![
        timed("event_history_order", async {
            for n in 0..3 {
                state
                    .pubsub
                    .publish_game_event(GameEvent::new(&game_id, "diag.tick", "diag").with_payload(json!({ "n": n })))
                    .await
                    .map_err(err)?;
            }
            let events = state.pubsub.get_recent_events(&game_id, None).await.map_err(err)?;
            let order: Vec<_> = events.iter().filter_map(|e| e.payload["n"].as_i64()).collect();
            ensure(order == vec![0, 1, 2], format!("history out of order: {order:?}"))?;
            Ok("3 events in publish order".into())
        })
        .await,
        timed("chat_and_stats", async {
            state
                .pubsub
                .publish_chat_message(ChatMessage::text(&game_id, "diag", "Diagnostics", "ping"))
                .await
                .map_err(err)?;
            let history = state.pubsub.get_chat_history(&game_id, None).await.map_err(err)?;
            ensure(history.len() == 1, "chat line missing from history")?;
            let stats = state.pubsub.get_channel_stats(&game_id).await.map_err(err)?;
            ensure(
                stats.total_events == 3 && stats.total_messages == 1,
                format!("unexpected stats {stats:?}"),
            )?;
            Ok("chat recorded and counted".into())
        })
        .await,
        timed("live_subscription", async {
            let mut subscription = state.pubsub.subscribe_game(&game_id).await.map_err(err)?;
            let id = state
                .pubsub
                .publish_game_event(GameEvent::new(&game_id, "diag.live", "diag"))
                .await
                .map_err(err)?;
            let received = tokio::time::timeout(Duration::from_secs(2), subscription.recv())
                .await
                .map_err(|_| "no live message within 2s".to_string())?;
            match received {
                Some(ChannelMessage::Event(event)) if event.id == id => Ok("live event delivered".into()),
                other => Err(format!("unexpected live message: {other:?}")),
            }
        })
        .await,
    ]
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

pub(super) async fn queue(state: &AppState, run_id: &str) -> Checks {
    let queue_name = format!("diag-{run_id}");
    // Immediate retries keep the dead-letter check fast.
    let queue: QueueService = state.queue.clone().with_retry_policy(RetryPolicy::immediate());
    vec![
        timed("priority_order", async {
            for priority in [2, 8, 5] {
                queue
                    .add_job(&queue_name, "diag.noop", json!({}), JobOptions::priority(priority))
                    .await
                    .map_err(err)?;
            }
            let mut order = Vec::new();
            while let Some(job) = queue.get_next_job(&queue_name).await.map_err(err)? {
                order.push(job.priority);
                queue.complete_job(&job.id, None).await.map_err(err)?;
            }
            ensure(order == vec![8, 5, 2], format!("claimed in order {order:?}"))?;
            Ok("claimed 8, 5, 2".into())
        })
        .await,
        timed("retry_then_dead_letter", async {
            let id = queue
                .add_job(&queue_name, "diag.flaky", json!({}), JobOptions::default().max_attempts(2))
                .await
                .map_err(err)?;
            for attempt in 1..=2 {
                let job = queue
                    .get_next_job(&queue_name)
                    .await
                    .map_err(err)?
                    .ok_or_else(|| format!("job not delivered for attempt {attempt}"))?;
                queue.fail_job(&job.id, "diagnostic failure").await.map_err(err)?;
            }
            let redelivered = queue.get_next_job(&queue_name).await.map_err(err)?;
            let job = queue.get_job(&id).await.map_err(err)?.ok_or("job record missing")?;
            ensure(redelivered.is_none(), "dead-lettered job was delivered again")?;
            ensure(job.status == JobStatus::Failed, format!("job ended as {:?}", job.status))?;
            Ok("failed twice, dead-lettered".into())
        })
        .await,
    ]
}

// ---------------------------------------------------------------------------
// Integration
// ---------------------------------------------------------------------------

pub(super) async fn integration(state: &AppState, run_id: &str) -> Checks {
    vec![
        timed("lock_scenario", async {
            let lock_id = format!("diag:{run_id}:L1");
            let first = state
                .locks
                .acquire_lock(&lock_id, "H1", &LockOptions::with_lease(5_000))
                .await
                .map_err(err)?;
            ensure(first.acquired, "H1 could not acquire")?;
            let second = state
                .locks
                .acquire_lock(&lock_id, "H2", &LockOptions::with_lease(5_000).retry(1, 10))
                .await
                .map_err(err)?;
            ensure(!second.acquired, "H2 acquired while H1 held the lock")?;
            let status = state.locks.get_lock_status(&lock_id).await.map_err(err)?;
            ensure(status.exists && status.holder.as_deref() == Some("H1"), "status does not show H1")?;
            let released = state.locks.release_lock(&lock_id, "H1").await.map_err(err)?;
            ensure(released.released, "H1 could not release")?;
            let third = state
                .locks
                .acquire_lock(&lock_id, "H2", &LockOptions::with_lease(5_000))
                .await
                .map_err(err)?;
            state.locks.release_lock(&lock_id, "H2").await.map_err(err)?;
            ensure(third.acquired, "H2 could not acquire after release")?;
            Ok("H1 acquire, H2 refused, release, H2 acquire".into())
        })
        .await,
        timed("session_start", async {
            let game_id = format!("diag-{run_id}-game");
            let board_id = format!("diag-{run_id}-board");
            let caller = Caller {
                user_id: "diag".into(),
                display_name: Some("Diagnostics".into()),
            };
            let start = session::start_session(state, &game_id, &board_id, &caller)
                .await
                .map_err(err)?;
            state
                .presence
                .leave_board_presence(&board_id, &caller.user_id)
                .await
                .map_err(err)?;
            let job = state
                .queue
                .get_job(&start.setup_job_id)
                .await
                .map_err(err)?
                .ok_or("setup job missing")?;
            let lock = state
                .locks
                .get_lock_status(&session::session_lock_id(&game_id))
                .await
                .map_err(err)?;
            ensure(!lock.exists, "session lock still held")?;
            ensure(job.job_type == session::SESSION_SETUP_JOB, "setup job has the wrong type")?;
            Ok(format!("session started, setup job {}", start.setup_job_id))
        })
        .await,
    ]
}
