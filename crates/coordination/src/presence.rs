//! Presence service: who is currently on a board.
//!
//! Each participant has one JSON entry under
//! `{prefix}:presence:{board}:entry:{participant}` carrying its own TTL, and
//! the board keeps a sorted-set index of participant ids scored by the
//! entry's expiry (epoch ms). The entry key is authoritative; the index only
//! makes enumeration possible and is pruned lazily on reads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tabletop_core::coordination::{roles, statuses, PRESENCE_TTL_SECS};
use tabletop_core::keys::KeySpace;
use tabletop_core::types::{now_ms, Timestamp};
use tabletop_store::{KeyValueStore, StoreResult};

/// Upper bound on participants enumerated per board read.
const MAX_BOARD_MEMBERS: usize = 1_000;

/// A participant's advisory presence record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub board_id: String,
    pub participant_id: String,
    pub display_name: String,
    pub role: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub status: String,
    pub joined_at: Timestamp,
    pub last_seen_at: Timestamp,
    pub ttl_secs: u64,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// What the joining participant says about itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticipantProfile {
    pub display_name: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// The participant's role on the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleInfo {
    pub role: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl Default for RoleInfo {
    fn default() -> Self {
        Self {
            role: roles::PLAYER.to_string(),
            permissions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceLeave {
    pub left: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub updated: bool,
}

/// Result of [`PresenceService::join_board_presence`].
pub struct PresenceJoin {
    pub participant_id: String,
    pub handle: PresenceHandle,
}

// ---------------------------------------------------------------------------
// PresenceService
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PresenceService {
    store: Arc<dyn KeyValueStore>,
    keys: KeySpace,
    ttl: Duration,
}

impl PresenceService {
    pub fn new(store: Arc<dyn KeyValueStore>, keys: KeySpace) -> Self {
        Self::with_ttl(store, keys, Duration::from_secs(PRESENCE_TTL_SECS))
    }

    pub fn with_ttl(store: Arc<dyn KeyValueStore>, keys: KeySpace, ttl: Duration) -> Self {
        Self { store, keys, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Register `participant_id` on `board_id`.
    ///
    /// Joining again overwrites the profile and refreshes the TTL; the
    /// original `joined_at` survives as long as the entry had not expired.
    pub async fn join_board_presence(
        &self,
        board_id: &str,
        participant_id: &str,
        profile: ParticipantProfile,
        role: RoleInfo,
    ) -> StoreResult<PresenceJoin> {
        let now = chrono::Utc::now();
        let joined_at = self
            .read_entry(board_id, participant_id)
            .await?
            .map(|existing| existing.joined_at)
            .unwrap_or(now);

        let entry = PresenceEntry {
            board_id: board_id.to_string(),
            participant_id: participant_id.to_string(),
            display_name: profile.display_name,
            role: role.role,
            permissions: role.permissions,
            status: statuses::ONLINE.to_string(),
            joined_at,
            last_seen_at: now,
            ttl_secs: self.ttl.as_secs(),
            metadata: profile.metadata,
        };
        self.write_entry(&entry).await?;

        tracing::debug!(board_id, participant_id, role = %entry.role, "Presence joined");

        Ok(PresenceJoin {
            participant_id: participant_id.to_string(),
            handle: PresenceHandle {
                service: self.clone(),
                board_id: board_id.to_string(),
                participant_id: participant_id.to_string(),
                closed: AtomicBool::new(false),
            },
        })
    }

    /// Remove a participant's entry. `left` is `false` if it was already gone.
    pub async fn leave_board_presence(
        &self,
        board_id: &str,
        participant_id: &str,
    ) -> StoreResult<PresenceLeave> {
        let left = self
            .store
            .delete(&self.keys.presence_entry(board_id, participant_id))
            .await?;
        self.store
            .sorted_remove(&self.keys.presence_index(board_id), participant_id)
            .await?;
        if left {
            tracing::debug!(board_id, participant_id, "Presence left");
        }
        Ok(PresenceLeave { left })
    }

    /// All non-expired participants on `board_id`, keyed by participant id.
    pub async fn get_board_presence(
        &self,
        board_id: &str,
    ) -> StoreResult<HashMap<String, PresenceEntry>> {
        self.prune(board_id).await?;

        let index = self.keys.presence_index(board_id);
        let members = self
            .store
            .sorted_range_by_score(&index, f64::NEG_INFINITY, f64::INFINITY, MAX_BOARD_MEMBERS)
            .await?;

        let mut roster = HashMap::with_capacity(members.len());
        for (participant_id, _) in members {
            match self.read_entry(board_id, &participant_id).await? {
                Some(entry) => {
                    roster.insert(participant_id, entry);
                }
                None => {
                    // Entry expired before its index score caught up.
                    self.store.sorted_remove(&index, &participant_id).await?;
                }
            }
        }
        Ok(roster)
    }

    /// Refresh a participant's TTL and merge `status` and `extra` metadata.
    ///
    /// Returns `updated: false` when the entry no longer exists; an expired
    /// participant must join again. The write only lands if the entry still
    /// exists at that moment, so a leave or expiry racing the update wins.
    pub async fn update_user_presence(
        &self,
        board_id: &str,
        participant_id: &str,
        status: Option<&str>,
        extra: serde_json::Map<String, serde_json::Value>,
    ) -> StoreResult<PresenceUpdate> {
        let Some(mut entry) = self.read_entry(board_id, participant_id).await? else {
            tracing::debug!(board_id, participant_id, "Presence update skipped: entry expired");
            return Ok(PresenceUpdate { updated: false });
        };

        if let Some(status) = status {
            entry.status = status.to_string();
        }
        entry.metadata.extend(extra);
        entry.last_seen_at = chrono::Utc::now();
        entry.ttl_secs = self.ttl.as_secs();

        let key = self.keys.presence_entry(board_id, participant_id);
        let updated = self
            .store
            .set_if_present(&key, &serde_json::to_string(&entry)?, Some(self.ttl))
            .await?;
        if !updated {
            tracing::debug!(board_id, participant_id, "Presence update skipped: entry removed");
            return Ok(PresenceUpdate { updated: false });
        }
        self.touch_index(board_id, participant_id).await?;

        Ok(PresenceUpdate { updated: true })
    }

    /// Drop index members whose recorded expiry has passed.
    ///
    /// Returns the number of members removed.
    pub async fn prune(&self, board_id: &str) -> StoreResult<u64> {
        let removed = self
            .store
            .sorted_remove_by_score(
                &self.keys.presence_index(board_id),
                f64::NEG_INFINITY,
                now_ms() as f64,
            )
            .await?;
        if removed > 0 {
            tracing::debug!(board_id, removed, "Pruned expired presence");
        }
        Ok(removed)
    }

    async fn read_entry(
        &self,
        board_id: &str,
        participant_id: &str,
    ) -> StoreResult<Option<PresenceEntry>> {
        let raw = self
            .store
            .get(&self.keys.presence_entry(board_id, participant_id))
            .await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn write_entry(&self, entry: &PresenceEntry) -> StoreResult<()> {
        let key = self.keys.presence_entry(&entry.board_id, &entry.participant_id);
        self.store
            .set(&key, &serde_json::to_string(entry)?, Some(self.ttl))
            .await?;
        self.touch_index(&entry.board_id, &entry.participant_id).await
    }

    /// Record the entry's new expiry in the board index.
    async fn touch_index(&self, board_id: &str, participant_id: &str) -> StoreResult<()> {
        let index = self.keys.presence_index(board_id);
        let expires_ms = now_ms() + self.ttl.as_millis() as i64;
        self.store
            .sorted_add(&index, participant_id, expires_ms as f64)
            .await?;
        // The index lives as long as its freshest member.
        self.store.expire(&index, self.ttl).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PresenceHandle
// ---------------------------------------------------------------------------

/// Handle returned on join; [`close`](Self::close) removes the entry.
///
/// Closing is idempotent: once a close has succeeded later calls do nothing,
/// and closing after the entry expired is harmless. A close that failed on a
/// store error can be retried.
pub struct PresenceHandle {
    service: PresenceService,
    board_id: String,
    participant_id: String,
    closed: AtomicBool,
}

impl PresenceHandle {
    pub fn board_id(&self) -> &str {
        &self.board_id
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Leave the board. Returns `true` if this call removed a live entry.
    pub async fn close(&self) -> StoreResult<bool> {
        if self.is_closed() {
            return Ok(false);
        }
        let leave = self
            .service
            .leave_board_presence(&self.board_id, &self.participant_id)
            .await?;
        self.closed.store(true, Ordering::SeqCst);
        Ok(leave.left)
    }
}

impl std::fmt::Debug for PresenceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceHandle")
            .field("board_id", &self.board_id)
            .field("participant_id", &self.participant_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tabletop_store::testing::FaultyStore;
    use tabletop_store::MemoryStore;

    fn service() -> PresenceService {
        PresenceService::new(Arc::new(MemoryStore::new()), KeySpace::new("test"))
    }

    fn profile(name: &str) -> ParticipantProfile {
        ParticipantProfile {
            display_name: name.to_string(),
            metadata: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn join_is_visible_on_board() {
        let presence = service();
        let join = presence
            .join_board_presence("b1", "u1", profile("Ada"), RoleInfo::default())
            .await
            .unwrap();
        assert_eq!(join.participant_id, "u1");

        let roster = presence.get_board_presence("b1").await.unwrap();
        let entry = &roster["u1"];
        assert_eq!(entry.display_name, "Ada");
        assert_eq!(entry.role, roles::PLAYER);
        assert_eq!(entry.status, statuses::ONLINE);
        assert_eq!(entry.ttl_secs, PRESENCE_TTL_SECS);
    }

    #[tokio::test]
    async fn joining_twice_keeps_one_entry_and_first_join_time() {
        let presence = service();
        presence
            .join_board_presence("b1", "u1", profile("Ada"), RoleInfo::default())
            .await
            .unwrap();
        let first = presence.get_board_presence("b1").await.unwrap()["u1"].joined_at;

        presence
            .join_board_presence("b1", "u1", profile("Ada L."), RoleInfo::default())
            .await
            .unwrap();
        let roster = presence.get_board_presence("b1").await.unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster["u1"].display_name, "Ada L.");
        assert_eq!(roster["u1"].joined_at, first);
    }

    #[tokio::test]
    async fn handle_close_is_idempotent() {
        let presence = service();
        let join = presence
            .join_board_presence("b1", "u1", profile("Ada"), RoleInfo::default())
            .await
            .unwrap();

        assert!(join.handle.close().await.unwrap());
        assert!(!join.handle.close().await.unwrap());
        assert!(join.handle.is_closed());
        assert!(presence.get_board_presence("b1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn close_after_store_error_can_be_retried() {
        let store = FaultyStore::new();
        let presence = PresenceService::new(store.clone(), KeySpace::new("test"));
        let join = presence
            .join_board_presence("b1", "u1", profile("Ada"), RoleInfo::default())
            .await
            .unwrap();

        store.fail("delete", ":entry:u1", 1);
        assert!(join.handle.close().await.is_err());
        assert!(!join.handle.is_closed());

        assert!(join.handle.close().await.unwrap());
        assert!(join.handle.is_closed());
        assert!(presence.get_board_presence("b1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn leave_reports_whether_entry_existed() {
        let presence = service();
        presence
            .join_board_presence("b1", "u1", profile("Ada"), RoleInfo::default())
            .await
            .unwrap();
        assert!(presence.leave_board_presence("b1", "u1").await.unwrap().left);
        assert!(!presence.leave_board_presence("b1", "u1").await.unwrap().left);
    }

    #[tokio::test]
    async fn update_merges_status_and_metadata() {
        let presence = service();
        let mut initial = profile("Ada");
        initial.metadata.insert("seat".into(), json!(2));
        presence
            .join_board_presence("b1", "u1", initial, RoleInfo::default())
            .await
            .unwrap();

        let mut extra = serde_json::Map::new();
        extra.insert("cursor".into(), json!({ "x": 4, "y": 7 }));
        let update = presence
            .update_user_presence("b1", "u1", Some(statuses::AWAY), extra)
            .await
            .unwrap();
        assert!(update.updated);

        let entry = presence.get_board_presence("b1").await.unwrap().remove("u1").unwrap();
        assert_eq!(entry.status, statuses::AWAY);
        assert_eq!(entry.metadata["seat"], json!(2));
        assert_eq!(entry.metadata["cursor"]["y"], json!(7));
    }

    #[tokio::test]
    async fn update_of_absent_entry_is_a_no_op() {
        let update = service()
            .update_user_presence("b1", "ghost", Some(statuses::BUSY), serde_json::Map::new())
            .await
            .unwrap();
        assert!(!update.updated);
    }

    #[tokio::test]
    async fn update_racing_a_leave_does_not_resurrect_the_entry() {
        let store = FaultyStore::new();
        let presence = PresenceService::new(store.clone(), KeySpace::new("test"));
        presence
            .join_board_presence("b1", "u1", profile("Ada"), RoleInfo::default())
            .await
            .unwrap();

        // Hold the update between its read and its write.
        let gate = store.pause_after("get", ":entry:u1");
        let update = {
            let presence = presence.clone();
            tokio::spawn(async move {
                presence
                    .update_user_presence("b1", "u1", Some(statuses::AWAY), serde_json::Map::new())
                    .await
            })
        };
        gate.reached().await;

        assert!(presence.leave_board_presence("b1", "u1").await.unwrap().left);
        gate.release();

        assert!(!update.await.unwrap().unwrap().updated);
        assert!(presence.get_board_presence("b1").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn update_keeps_entry_alive_for_a_full_ttl() {
        let store = Arc::new(MemoryStore::new());
        let presence =
            PresenceService::with_ttl(store.clone(), KeySpace::new("test"), Duration::from_secs(5));
        presence
            .join_board_presence("b1", "u1", profile("Ada"), RoleInfo::default())
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        presence
            .update_user_presence("b1", "u1", None, serde_json::Map::new())
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;

        assert!(presence.get_board_presence("b1").await.unwrap().contains_key("u1"));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_disappear_from_roster() {
        let presence = PresenceService::with_ttl(
            Arc::new(MemoryStore::new()),
            KeySpace::new("test"),
            Duration::from_secs(5),
        );
        presence
            .join_board_presence("b1", "u1", profile("Ada"), RoleInfo::default())
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;

        assert!(presence.get_board_presence("b1").await.unwrap().is_empty());
        let update = presence
            .update_user_presence("b1", "u1", None, serde_json::Map::new())
            .await
            .unwrap();
        assert!(!update.updated);
    }

    #[tokio::test]
    async fn boards_are_isolated() {
        let presence = service();
        presence
            .join_board_presence("b1", "u1", profile("Ada"), RoleInfo::default())
            .await
            .unwrap();
        presence
            .join_board_presence(
                "b2",
                "u2",
                profile("Grace"),
                RoleInfo {
                    role: roles::HOST.to_string(),
                    permissions: vec!["kick".into()],
                },
            )
            .await
            .unwrap();

        let b2 = presence.get_board_presence("b2").await.unwrap();
        assert_eq!(b2.len(), 1);
        assert_eq!(b2["u2"].role, roles::HOST);
        assert_eq!(b2["u2"].permissions, vec!["kick".to_string()]);
    }
}
