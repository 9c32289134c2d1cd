//! Store key and channel naming.
//!
//! Every service builds its keys through a [`KeySpace`] so that several
//! deployments (or test runs) can share one store without colliding. Keys
//! are colon-separated: `{prefix}:{component}:{...}`.

/// Default namespace prefix for all keys.
pub const DEFAULT_KEY_PREFIX: &str = "tabletop";

/// Namespaced key builder shared by all coordination services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    // -- locks ----------------------------------------------------------------

    /// Key holding the current holder of lock `lock_id`.
    pub fn lock(&self, lock_id: &str) -> String {
        format!("{}:lock:{lock_id}", self.prefix)
    }

    // -- presence -------------------------------------------------------------

    /// Key holding one participant's presence entry (JSON, TTL-backed).
    pub fn presence_entry(&self, board_id: &str, participant_id: &str) -> String {
        format!("{}:presence:{board_id}:entry:{participant_id}", self.prefix)
    }

    /// Sorted set of participant ids on a board, scored by entry expiry (ms).
    pub fn presence_index(&self, board_id: &str) -> String {
        format!("{}:presence:{board_id}:members", self.prefix)
    }

    // -- pub/sub --------------------------------------------------------------

    /// Live channel carrying game events.
    pub fn event_channel(&self, game_id: &str) -> String {
        format!("{}:game:{game_id}:events", self.prefix)
    }

    /// Live channel carrying chat messages.
    pub fn chat_channel(&self, game_id: &str) -> String {
        format!("{}:game:{game_id}:chat", self.prefix)
    }

    /// Bounded history list for a channel.
    pub fn history(&self, channel: &str) -> String {
        format!("{channel}:history")
    }

    /// Monotonic publish counter for a channel.
    pub fn channel_counter(&self, channel: &str) -> String {
        format!("{channel}:count")
    }

    // -- queue ----------------------------------------------------------------

    /// JSON record for a single job.
    pub fn job(&self, job_id: &str) -> String {
        format!("{}:job:{job_id}", self.prefix)
    }

    /// Ready jobs, scored by priority then enqueue sequence.
    pub fn queue_waiting(&self, queue_name: &str) -> String {
        format!("{}:queue:{queue_name}:waiting", self.prefix)
    }

    /// Jobs not yet ready, scored by `ready_at` (ms).
    pub fn queue_delayed(&self, queue_name: &str) -> String {
        format!("{}:queue:{queue_name}:delayed", self.prefix)
    }

    /// Jobs held by a consumer, scored by dequeue time (ms).
    pub fn queue_active(&self, queue_name: &str) -> String {
        format!("{}:queue:{queue_name}:active", self.prefix)
    }

    /// Completed jobs, scored by completion time (ms).
    pub fn queue_completed(&self, queue_name: &str) -> String {
        format!("{}:queue:{queue_name}:completed", self.prefix)
    }

    /// Dead-lettered jobs, scored by failure time (ms).
    pub fn queue_failed(&self, queue_name: &str) -> String {
        format!("{}:queue:{queue_name}:failed", self.prefix)
    }

    /// Per-queue enqueue sequence used for FIFO tie-breaking.
    pub fn queue_sequence(&self, queue_name: &str) -> String {
        format!("{}:queue:{queue_name}:seq", self.prefix)
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        let keys = KeySpace::new("t1");
        assert_eq!(keys.lock("game-1"), "t1:lock:game-1");
        assert_eq!(keys.presence_entry("b", "p"), "t1:presence:b:entry:p");
        assert_eq!(keys.queue_waiting("setup"), "t1:queue:setup:waiting");
    }

    #[test]
    fn history_key_derives_from_channel() {
        let keys = KeySpace::default();
        let channel = keys.event_channel("g1");
        assert_eq!(channel, "tabletop:game:g1:events");
        assert_eq!(keys.history(&channel), "tabletop:game:g1:events:history");
    }

    #[test]
    fn distinct_prefixes_do_not_collide() {
        assert_ne!(KeySpace::new("a").lock("x"), KeySpace::new("b").lock("x"));
    }
}
