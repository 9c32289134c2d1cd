//! Store client contracts.
//!
//! [`KeyValueStore`] and [`PubSubBroker`] are the only way the coordination
//! services touch shared state. Every method is a single atomic operation on
//! the backing store; services compose them but never assume two calls are
//! observed together. State transitions that must not be torn apart (a job
//! leaving one set and entering another) get their own primitive.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::StoreResult;

/// A member of a sorted set together with its score.
pub type ScoredMember = (String, f64);

/// Atomic key-value primitives.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Round-trip to the store. Used by health checks.
    async fn ping(&self) -> StoreResult<()>;

    // -- strings --------------------------------------------------------------

    /// Set `key` to `value` with a TTL only if the key does not exist.
    ///
    /// Returns `true` if this call created the key.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Unconditionally set `key`, replacing any previous TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Overwrite `key` only if it currently exists. With `ttl: None` the
    /// key keeps its remaining TTL.
    ///
    /// Returns `false` (and writes nothing) if the key was missing or expired.
    async fn set_if_present(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<bool>;

    /// Returns `true` if the key existed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Delete `key` only if it currently holds `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool>;

    /// Add `additional` to the remaining TTL of `key` only if it currently
    /// holds `expected`.
    ///
    /// Returns the new remaining TTL, or `None` if the value did not match
    /// (or the key is gone).
    async fn compare_and_extend(
        &self,
        key: &str,
        expected: &str,
        additional: Duration,
    ) -> StoreResult<Option<Duration>>;

    /// Remaining TTL of `key`; `None` if the key is missing or never expires.
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    /// Set a TTL on an existing key. Returns `false` if the key is missing.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Atomically add `by` to the integer at `key` (missing keys start at 0).
    async fn increment(&self, key: &str, by: i64) -> StoreResult<i64>;

    // -- sorted sets ----------------------------------------------------------

    /// Insert or re-score `member`. Returns `true` if the member is new.
    async fn sorted_add(&self, key: &str, member: &str, score: f64) -> StoreResult<bool>;

    /// Remove `member`. Returns `true` if it was present.
    async fn sorted_remove(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Atomically remove and return the lowest-scored member.
    async fn sorted_pop_min(&self, key: &str) -> StoreResult<Option<ScoredMember>>;

    /// Pop the lowest-scored member of `source` and insert it into
    /// `destination` with `score`, as one atomic step.
    ///
    /// Returns the member with its score in `source`.
    async fn sorted_pop_min_into(
        &self,
        source: &str,
        destination: &str,
        score: f64,
    ) -> StoreResult<Option<ScoredMember>>;

    /// Move `member` from `source` to `destination` with `score`, as one
    /// atomic step. Returns `false` (and writes nothing) if `member` was not
    /// in `source`.
    async fn sorted_move(
        &self,
        source: &str,
        destination: &str,
        member: &str,
        score: f64,
    ) -> StoreResult<bool>;

    /// Members with `min <= score <= max`, ascending, at most `limit`.
    async fn sorted_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> StoreResult<Vec<ScoredMember>>;

    /// Remove members with `min <= score <= max`. Returns how many were removed.
    async fn sorted_remove_by_score(&self, key: &str, min: f64, max: f64) -> StoreResult<u64>;

    async fn sorted_count(&self, key: &str) -> StoreResult<u64>;

    // -- capped lists ---------------------------------------------------------

    /// Prepend `value` and trim the list to its newest `capacity` entries,
    /// optionally refreshing the list's TTL. Executed as one transaction.
    async fn list_push_capped(
        &self,
        key: &str,
        value: &str,
        capacity: usize,
        ttl: Option<Duration>,
    ) -> StoreResult<()>;

    /// Up to `limit` entries, newest first.
    async fn list_range(&self, key: &str, limit: usize) -> StoreResult<Vec<String>>;
}

/// Fire-and-forget channel messaging.
#[async_trait]
pub trait PubSubBroker: Send + Sync {
    /// Publish `payload` on `channel`. Returns the number of live receivers.
    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<u64>;

    /// Start receiving messages published on `channel` from now on.
    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription>;
}

/// A live subscription to one channel.
///
/// Messages published before the subscription was created are not
/// delivered. Dropping the subscription stops the forwarding task.
pub struct Subscription {
    channel: String,
    receiver: mpsc::UnboundedReceiver<String>,
    forwarder: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(
        channel: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<String>,
        forwarder: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            channel: channel.into(),
            receiver,
            forwarder,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next payload. `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<String> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}
