//! In-process store with the same atomicity contracts as the Redis backend.
//!
//! Every operation takes a single mutex over the whole keyspace, so each
//! call is atomic with respect to every other call, exactly like a
//! single-threaded Redis server. Pub/sub fans out through one
//! `tokio::sync::broadcast` channel per channel name.
//!
//! TTLs are "soft": an expired key is treated as absent on every read and
//! physically removed either lazily (when touched) or by
//! [`MemoryStore::sweep_expired`], which [`MemoryStore::spawn_sweeper`] runs
//! periodically. Expiry uses `tokio::time::Instant`, so tests can drive it
//! with a paused clock.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{StoreError, StoreResult};
use crate::traits::{KeyValueStore, PubSubBroker, ScoredMember, Subscription};

/// Buffer capacity of each channel's broadcast sender.
const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Sorted(HashMap<String, f64>),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
}

impl Keyspace {
    /// Live entry for `key`, dropping it first if its TTL has lapsed.
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let now = Instant::now();
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn sorted_mut(&mut self, key: &str, create: bool) -> StoreResult<Option<&mut HashMap<String, f64>>> {
        if self.live(key).is_none() {
            if !create {
                return Ok(None);
            }
            self.entries
                .insert(key.to_string(), Entry::new(Value::Sorted(HashMap::new())));
        }
        match self.entries.get_mut(key).map(|e| &mut e.value) {
            Some(Value::Sorted(set)) => Ok(Some(set)),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    /// Remove and return the lowest-scored member of `key`.
    fn pop_min(&mut self, key: &str) -> StoreResult<Option<ScoredMember>> {
        let popped = match self.sorted_mut(key, false)? {
            Some(set) => {
                let min = sorted_ascending(set).into_iter().next();
                if let Some((member, _)) = &min {
                    set.remove(member);
                }
                min
            }
            None => None,
        };
        self.drop_if_empty(key);
        Ok(popped)
    }

    fn insert_sorted(&mut self, key: &str, member: String, score: f64) -> StoreResult<bool> {
        let set = self
            .sorted_mut(key, true)?
            .ok_or_else(|| StoreError::InvalidResponse(format!("sorted set {key} vanished")))?;
        Ok(set.insert(member, score).is_none())
    }

    /// Drop a collection key once it has no members left, like Redis does.
    fn drop_if_empty(&mut self, key: &str) {
        let empty = match self.entries.get(key).map(|e| &e.value) {
            Some(Value::Sorted(set)) => set.is_empty(),
            Some(Value::List(list)) => list.is_empty(),
            _ => false,
        };
        if empty {
            self.entries.remove(key);
        }
    }
}

fn sorted_ascending(set: &HashMap<String, f64>) -> Vec<ScoredMember> {
    let mut members: Vec<ScoredMember> = set.iter().map(|(m, s)| (m.clone(), *s)).collect();
    members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    members
}

/// In-memory implementation of [`KeyValueStore`] and [`PubSubBroker`].
///
/// Designed to be shared via `Arc<MemoryStore>`.
#[derive(Default)]
pub struct MemoryStore {
    keyspace: Mutex<Keyspace>,
    channels: RwLock<HashMap<String, broadcast::Sender<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Physically remove every expired key. Returns how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut keyspace = self.keyspace.lock().await;
        let before = keyspace.entries.len();
        keyspace.entries.retain(|_, entry| !entry.is_expired(now));
        before - keyspace.entries.len()
    }

    /// Forget channels whose subscribers have all gone away. Returns how many
    /// were removed.
    pub async fn prune_idle_channels(&self) -> usize {
        let mut channels = self.channels.write().await;
        let before = channels.len();
        channels.retain(|_, sender| sender.receiver_count() > 0);
        before - channels.len()
    }

    /// Number of channels with a live broadcast sender.
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Number of physically stored keys, including expired ones not yet swept.
    pub async fn stored_key_count(&self) -> usize {
        self.keyspace.lock().await.entries.len()
    }

    /// Spawn a background task that calls [`sweep_expired`](Self::sweep_expired)
    /// and [`prune_idle_channels`](Self::prune_idle_channels) every
    /// `interval` until `cancel` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("Memory store sweeper stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = self.sweep_expired().await;
                        let idle = self.prune_idle_channels().await;
                        if removed > 0 || idle > 0 {
                            tracing::debug!(removed, idle_channels = idle, "Swept expired keys");
                        }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut keyspace = self.keyspace.lock().await;
        if keyspace.live(key).is_some() {
            return Ok(false);
        }
        keyspace.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut keyspace = self.keyspace.lock().await;
        match keyspace.live(key).map(|e| &e.value) {
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut keyspace = self.keyspace.lock().await;
        keyspace.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_if_present(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<bool> {
        let mut keyspace = self.keyspace.lock().await;
        let Some(entry) = keyspace.live(key) else {
            return Ok(false);
        };
        entry.value = Value::Str(value.to_string());
        if let Some(ttl) = ttl {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(true)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut keyspace = self.keyspace.lock().await;
        let existed = keyspace.live(key).is_some();
        keyspace.entries.remove(key);
        Ok(existed)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let mut keyspace = self.keyspace.lock().await;
        let matches = matches!(
            keyspace.live(key).map(|e| &e.value),
            Some(Value::Str(s)) if s == expected
        );
        if matches {
            keyspace.entries.remove(key);
        }
        Ok(matches)
    }

    async fn compare_and_extend(
        &self,
        key: &str,
        expected: &str,
        additional: Duration,
    ) -> StoreResult<Option<Duration>> {
        let mut keyspace = self.keyspace.lock().await;
        let now = Instant::now();
        let Some(entry) = keyspace.live(key) else {
            return Ok(None);
        };
        if !matches!(&entry.value, Value::Str(s) if s == expected) {
            return Ok(None);
        }
        let remaining = entry
            .expires_at
            .map(|at| at.saturating_duration_since(now))
            .unwrap_or_default();
        let new_ttl = remaining + additional;
        entry.expires_at = Some(now + new_ttl);
        Ok(Some(new_ttl))
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let mut keyspace = self.keyspace.lock().await;
        let now = Instant::now();
        Ok(keyspace
            .live(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut keyspace = self.keyspace.lock().await;
        match keyspace.live(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn increment(&self, key: &str, by: i64) -> StoreResult<i64> {
        let mut keyspace = self.keyspace.lock().await;
        let (current, expires_at) = match keyspace.live(key) {
            Some(Entry {
                value: Value::Str(s),
                expires_at,
            }) => {
                let current = s
                    .parse::<i64>()
                    .map_err(|_| StoreError::WrongType(key.to_string()))?;
                (current, *expires_at)
            }
            Some(_) => return Err(StoreError::WrongType(key.to_string())),
            None => (0, None),
        };
        let next = current.saturating_add(by);
        keyspace.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(next.to_string()),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn sorted_add(&self, key: &str, member: &str, score: f64) -> StoreResult<bool> {
        let mut keyspace = self.keyspace.lock().await;
        keyspace.insert_sorted(key, member.to_string(), score)
    }

    async fn sorted_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut keyspace = self.keyspace.lock().await;
        let removed = match keyspace.sorted_mut(key, false)? {
            Some(set) => set.remove(member).is_some(),
            None => false,
        };
        keyspace.drop_if_empty(key);
        Ok(removed)
    }

    async fn sorted_pop_min(&self, key: &str) -> StoreResult<Option<ScoredMember>> {
        let mut keyspace = self.keyspace.lock().await;
        keyspace.pop_min(key)
    }

    async fn sorted_pop_min_into(
        &self,
        source: &str,
        destination: &str,
        score: f64,
    ) -> StoreResult<Option<ScoredMember>> {
        let mut keyspace = self.keyspace.lock().await;
        // Type-check the destination before touching the source.
        keyspace.sorted_mut(destination, false)?;
        let Some((member, source_score)) = keyspace.pop_min(source)? else {
            return Ok(None);
        };
        keyspace.insert_sorted(destination, member.clone(), score)?;
        Ok(Some((member, source_score)))
    }

    async fn sorted_move(
        &self,
        source: &str,
        destination: &str,
        member: &str,
        score: f64,
    ) -> StoreResult<bool> {
        let mut keyspace = self.keyspace.lock().await;
        keyspace.sorted_mut(destination, false)?;
        let removed = match keyspace.sorted_mut(source, false)? {
            Some(set) => set.remove(member).is_some(),
            None => false,
        };
        keyspace.drop_if_empty(source);
        if removed {
            keyspace.insert_sorted(destination, member.to_string(), score)?;
        }
        Ok(removed)
    }

    async fn sorted_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> StoreResult<Vec<ScoredMember>> {
        let mut keyspace = self.keyspace.lock().await;
        Ok(match keyspace.sorted_mut(key, false)? {
            Some(set) => sorted_ascending(set)
                .into_iter()
                .filter(|(_, score)| *score >= min && *score <= max)
                .take(limit)
                .collect(),
            None => Vec::new(),
        })
    }

    async fn sorted_remove_by_score(&self, key: &str, min: f64, max: f64) -> StoreResult<u64> {
        let mut keyspace = self.keyspace.lock().await;
        let removed = match keyspace.sorted_mut(key, false)? {
            Some(set) => {
                let before = set.len();
                set.retain(|_, score| *score < min || *score > max);
                (before - set.len()) as u64
            }
            None => 0,
        };
        keyspace.drop_if_empty(key);
        Ok(removed)
    }

    async fn sorted_count(&self, key: &str) -> StoreResult<u64> {
        let mut keyspace = self.keyspace.lock().await;
        Ok(keyspace
            .sorted_mut(key, false)?
            .map(|set| set.len() as u64)
            .unwrap_or(0))
    }

    async fn list_push_capped(
        &self,
        key: &str,
        value: &str,
        capacity: usize,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let mut keyspace = self.keyspace.lock().await;
        if keyspace.live(key).is_none() {
            keyspace
                .entries
                .insert(key.to_string(), Entry::new(Value::List(VecDeque::new())));
        }
        let entry = keyspace
            .entries
            .get_mut(key)
            .ok_or_else(|| StoreError::InvalidResponse(format!("list {key} vanished")))?;
        let Value::List(list) = &mut entry.value else {
            return Err(StoreError::WrongType(key.to_string()));
        };
        list.push_front(value.to_string());
        list.truncate(capacity);
        if let Some(ttl) = ttl {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        keyspace.drop_if_empty(key);
        Ok(())
    }

    async fn list_range(&self, key: &str, limit: usize) -> StoreResult<Vec<String>> {
        let mut keyspace = self.keyspace.lock().await;
        match keyspace.live(key).map(|e| &e.value) {
            Some(Value::List(list)) => Ok(list.iter().take(limit).cloned().collect()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl PubSubBroker for MemoryStore {
    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<u64> {
        {
            let channels = self.channels.read().await;
            match channels.get(channel) {
                // A send error only means there are zero receivers.
                Some(sender) if sender.receiver_count() > 0 => {
                    return Ok(sender.send(payload.to_string()).unwrap_or(0) as u64);
                }
                Some(_) => {}
                None => return Ok(0),
            }
        }

        // Every subscriber has gone; forget the sender.
        let mut channels = self.channels.write().await;
        if channels.get(channel).is_some_and(|sender| sender.receiver_count() == 0) {
            channels.remove(channel);
        }
        Ok(0)
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription> {
        let mut receiver = {
            let mut channels = self.channels.write().await;
            channels
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .subscribe()
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let name = channel.to_string();
        let forwarder = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(payload) => {
                        if tx.send(payload).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(channel = %name, skipped = n, "Subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::new(channel, rx, Some(forwarder)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
