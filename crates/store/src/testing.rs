//! Fault injection for exercising services against an unreliable store.
//!
//! [`FaultyStore`] wraps a [`MemoryStore`] and lets a test fail or pause
//! selected calls. Rules match on the operation name (the trait method name,
//! e.g. `"sorted_pop_min_into"`) and a fragment of the key; multi-key
//! operations match on their source key.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::{StoreError, StoreResult};
use crate::memory::MemoryStore;
use crate::traits::{KeyValueStore, PubSubBroker, ScoredMember, Subscription};
use crate::StoreHandle;

/// Rendezvous between a paused store call and the test driving it.
#[derive(Default)]
pub struct Gate {
    reached: Notify,
    release: Notify,
}

impl Gate {
    /// Wait until the paused call has completed its store operation.
    pub async fn reached(&self) {
        self.reached.notified().await;
    }

    /// Let the paused call return to its caller.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[derive(Clone)]
enum Action {
    Fail,
    Pause(Arc<Gate>),
}

struct Rule {
    op: &'static str,
    key_fragment: String,
    remaining: usize,
    action: Action,
}

/// [`MemoryStore`] with injectable failures and pauses.
pub struct FaultyStore {
    inner: Arc<MemoryStore>,
    rules: Mutex<Vec<Rule>>,
}

impl FaultyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(MemoryStore::new()),
            rules: Mutex::new(Vec::new()),
        })
    }

    /// The wrapped store, for setup and assertions that bypass the rules.
    pub fn inner(&self) -> &Arc<MemoryStore> {
        &self.inner
    }

    /// A [`StoreHandle`] whose key-value and broker sides both go through
    /// the rules.
    pub fn handle(self: &Arc<Self>) -> StoreHandle {
        StoreHandle::new(self.clone())
    }

    /// Fail the next `times` calls of `op` on a key containing
    /// `key_fragment`. Failed calls never reach the store.
    pub fn fail(&self, op: &'static str, key_fragment: &str, times: usize) {
        self.push(op, key_fragment, times, Action::Fail);
    }

    /// Hold the next call of `op` on a key containing `key_fragment` after
    /// it has been applied, until the returned gate is released.
    pub fn pause_after(&self, op: &'static str, key_fragment: &str) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.push(op, key_fragment, 1, Action::Pause(gate.clone()));
        gate
    }

    fn push(&self, op: &'static str, key_fragment: &str, times: usize, action: Action) {
        if times == 0 {
            return;
        }
        self.rules
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Rule {
                op,
                key_fragment: key_fragment.to_string(),
                remaining: times,
                action,
            });
    }

    fn take(&self, op: &str, key: &str, wanted: impl Fn(&Action) -> bool) -> Option<Action> {
        let mut rules = self.rules.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let index = rules
            .iter()
            .position(|r| r.op == op && key.contains(&r.key_fragment) && wanted(&r.action))?;
        let rule = &mut rules[index];
        rule.remaining -= 1;
        let action = rule.action.clone();
        if rule.remaining == 0 {
            rules.remove(index);
        }
        Some(action)
    }

    fn before(&self, op: &str, key: &str) -> StoreResult<()> {
        match self.take(op, key, |a| matches!(a, Action::Fail)) {
            Some(_) => Err(StoreError::Connection(format!("injected fault in {op}"))),
            None => Ok(()),
        }
    }

    async fn after(&self, op: &str, key: &str) {
        if let Some(Action::Pause(gate)) = self.take(op, key, |a| matches!(a, Action::Pause(_))) {
            gate.reached.notify_one();
            gate.release.notified().await;
        }
    }
}

/// Run `$call` against the inner store between the `before` and `after`
/// hooks for `$op` on `$key`.
macro_rules! hooked {
    ($self:ident, $op:literal, $key:expr, $call:expr) => {{
        $self.before($op, $key)?;
        let result = $call.await;
        $self.after($op, $key).await;
        result
    }};
}

#[async_trait]
impl KeyValueStore for FaultyStore {
    async fn ping(&self) -> StoreResult<()> {
        hooked!(self, "ping", "", self.inner.ping())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        hooked!(self, "set_if_absent", key, self.inner.set_if_absent(key, value, ttl))
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        hooked!(self, "get", key, self.inner.get(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        hooked!(self, "set", key, self.inner.set(key, value, ttl))
    }

    async fn set_if_present(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<bool> {
        hooked!(self, "set_if_present", key, self.inner.set_if_present(key, value, ttl))
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        hooked!(self, "delete", key, self.inner.delete(key))
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        hooked!(self, "compare_and_delete", key, self.inner.compare_and_delete(key, expected))
    }

    async fn compare_and_extend(
        &self,
        key: &str,
        expected: &str,
        additional: Duration,
    ) -> StoreResult<Option<Duration>> {
        hooked!(
            self,
            "compare_and_extend",
            key,
            self.inner.compare_and_extend(key, expected, additional)
        )
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        hooked!(self, "ttl", key, self.inner.ttl(key))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        hooked!(self, "expire", key, self.inner.expire(key, ttl))
    }

    async fn increment(&self, key: &str, by: i64) -> StoreResult<i64> {
        hooked!(self, "increment", key, self.inner.increment(key, by))
    }

    async fn sorted_add(&self, key: &str, member: &str, score: f64) -> StoreResult<bool> {
        hooked!(self, "sorted_add", key, self.inner.sorted_add(key, member, score))
    }

    async fn sorted_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        hooked!(self, "sorted_remove", key, self.inner.sorted_remove(key, member))
    }

    async fn sorted_pop_min(&self, key: &str) -> StoreResult<Option<ScoredMember>> {
        hooked!(self, "sorted_pop_min", key, self.inner.sorted_pop_min(key))
    }

    async fn sorted_pop_min_into(
        &self,
        source: &str,
        destination: &str,
        score: f64,
    ) -> StoreResult<Option<ScoredMember>> {
        hooked!(
            self,
            "sorted_pop_min_into",
            source,
            self.inner.sorted_pop_min_into(source, destination, score)
        )
    }

    async fn sorted_move(
        &self,
        source: &str,
        destination: &str,
        member: &str,
        score: f64,
    ) -> StoreResult<bool> {
        hooked!(
            self,
            "sorted_move",
            source,
            self.inner.sorted_move(source, destination, member, score)
        )
    }

    async fn sorted_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> StoreResult<Vec<ScoredMember>> {
        hooked!(
            self,
            "sorted_range_by_score",
            key,
            self.inner.sorted_range_by_score(key, min, max, limit)
        )
    }

    async fn sorted_remove_by_score(&self, key: &str, min: f64, max: f64) -> StoreResult<u64> {
        hooked!(
            self,
            "sorted_remove_by_score",
            key,
            self.inner.sorted_remove_by_score(key, min, max)
        )
    }

    async fn sorted_count(&self, key: &str) -> StoreResult<u64> {
        hooked!(self, "sorted_count", key, self.inner.sorted_count(key))
    }

    async fn list_push_capped(
        &self,
        key: &str,
        value: &str,
        capacity: usize,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        hooked!(
            self,
            "list_push_capped",
            key,
            self.inner.list_push_capped(key, value, capacity, ttl)
        )
    }

    async fn list_range(&self, key: &str, limit: usize) -> StoreResult<Vec<String>> {
        hooked!(self, "list_range", key, self.inner.list_range(key, limit))
    }
}

#[async_trait]
impl PubSubBroker for FaultyStore {
    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<u64> {
        hooked!(self, "publish", channel, self.inner.publish(channel, payload))
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription> {
        hooked!(self, "subscribe", channel, self.inner.subscribe(channel))
    }
}
