//! Redis-backed store.
//!
//! Wraps a multiplexed async connection. Compare-and-* operations and moves
//! between sorted sets run as Lua scripts so the read and the write happen
//! atomically on the server; capped list pushes run as a `MULTI` pipeline.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use tokio::sync::mpsc;

use crate::error::{StoreError, StoreResult};
use crate::traits::{KeyValueStore, PubSubBroker, ScoredMember, Subscription};

const COMPARE_AND_DELETE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

const COMPARE_AND_EXTEND: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    local ttl = redis.call('PTTL', KEYS[1])
    if ttl < 0 then ttl = 0 end
    local next = ttl + tonumber(ARGV[2])
    redis.call('PEXPIRE', KEYS[1], next)
    return next
end
return -1
"#;

const POP_MIN_INTO: &str = r#"
local popped = redis.call('ZPOPMIN', KEYS[1])
if #popped == 0 then
    return {}
end
redis.call('ZADD', KEYS[2], ARGV[1], popped[1])
return popped
"#;

const MOVE_MEMBER: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 1 then
    redis.call('ZADD', KEYS[2], ARGV[2], ARGV[1])
    return 1
end
return 0
"#;

/// Store client over a Redis (or Redis-compatible) server.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    connection: MultiplexedConnection,
}

impl RedisStore {
    /// Connect using a URL of the form `redis://[user:pass@]host[:port][/db]`.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Connection(format!("failed to parse URL: {e}")))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Connection(format!("failed to connect: {e}")))?;

        Ok(Self { client, connection })
    }

    fn conn(&self) -> MultiplexedConnection {
        self.connection.clone()
    }
}

fn millis(duration: Duration) -> u64 {
    // Redis rejects a zero PX/PEXPIRE.
    (duration.as_millis() as u64).max(1)
}

fn score_arg(score: f64) -> String {
    if score == f64::INFINITY {
        "+inf".to_string()
    } else if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        score.to_string()
    }
}

/// Parse a flat `[member, score, member, score, ...]` reply.
fn scored_pairs(flat: Vec<String>) -> StoreResult<Vec<ScoredMember>> {
    if flat.len() % 2 != 0 {
        return Err(StoreError::InvalidResponse(
            "odd number of elements in scored reply".to_string(),
        ));
    }
    flat.chunks(2)
        .map(|pair| {
            let score = pair[1]
                .parse::<f64>()
                .map_err(|e| StoreError::InvalidResponse(format!("bad score '{}': {e}", pair[1])))?;
            Ok((pair[0].clone(), score))
        })
        .collect()
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn();
        let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.conn();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn set_if_present(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<bool> {
        let mut conn = self.conn();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("XX");
        match ttl {
            Some(ttl) => cmd.arg("PX").arg(millis(ttl)),
            None => cmd.arg("KEEPTTL"),
        };
        let reply: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn();
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let mut conn = self.conn();
        let removed: i64 = redis::Script::new(COMPARE_AND_DELETE)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn compare_and_extend(
        &self,
        key: &str,
        expected: &str,
        additional: Duration,
    ) -> StoreResult<Option<Duration>> {
        let mut conn = self.conn();
        let next: i64 = redis::Script::new(COMPARE_AND_EXTEND)
            .key(key)
            .arg(expected)
            .arg(additional.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok((next >= 0).then(|| Duration::from_millis(next as u64)))
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let mut conn = self.conn();
        // -2: missing key, -1: no expiry.
        let pttl: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        Ok((pttl >= 0).then(|| Duration::from_millis(pttl as u64)))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn();
        let set: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(set == 1)
    }

    async fn increment(&self, key: &str, by: i64) -> StoreResult<i64> {
        let mut conn = self.conn();
        let value: i64 = redis::cmd("INCRBY").arg(key).arg(by).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn sorted_add(&self, key: &str, member: &str, score: f64) -> StoreResult<bool> {
        let mut conn = self.conn();
        let added: i64 = redis::cmd("ZADD")
            .arg(key)
            .arg(score_arg(score))
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(added > 0)
    }

    async fn sorted_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn();
        let removed: i64 = redis::cmd("ZREM").arg(key).arg(member).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn sorted_pop_min(&self, key: &str) -> StoreResult<Option<ScoredMember>> {
        let mut conn = self.conn();
        let flat: Vec<String> = redis::cmd("ZPOPMIN").arg(key).arg(1).query_async(&mut conn).await?;
        Ok(scored_pairs(flat)?.into_iter().next())
    }

    async fn sorted_pop_min_into(
        &self,
        source: &str,
        destination: &str,
        score: f64,
    ) -> StoreResult<Option<ScoredMember>> {
        let mut conn = self.conn();
        let flat: Vec<String> = redis::Script::new(POP_MIN_INTO)
            .key(source)
            .key(destination)
            .arg(score_arg(score))
            .invoke_async(&mut conn)
            .await?;
        Ok(scored_pairs(flat)?.into_iter().next())
    }

    async fn sorted_move(
        &self,
        source: &str,
        destination: &str,
        member: &str,
        score: f64,
    ) -> StoreResult<bool> {
        let mut conn = self.conn();
        let moved: i64 = redis::Script::new(MOVE_MEMBER)
            .key(source)
            .key(destination)
            .arg(member)
            .arg(score_arg(score))
            .invoke_async(&mut conn)
            .await?;
        Ok(moved == 1)
    }

    async fn sorted_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> StoreResult<Vec<ScoredMember>> {
        let mut conn = self.conn();
        let flat: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg(score_arg(min))
            .arg(score_arg(max))
            .arg("WITHSCORES")
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut conn)
            .await?;
        scored_pairs(flat)
    }

    async fn sorted_remove_by_score(&self, key: &str, min: f64, max: f64) -> StoreResult<u64> {
        let mut conn = self.conn();
        let removed: u64 = redis::cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg(score_arg(min))
            .arg(score_arg(max))
            .query_async(&mut conn)
            .await?;
        Ok(removed)
    }

    async fn sorted_count(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn();
        let count: u64 = redis::cmd("ZCARD").arg(key).query_async(&mut conn).await?;
        Ok(count)
    }

    async fn list_push_capped(
        &self,
        key: &str,
        value: &str,
        capacity: usize,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let mut conn = self.conn();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("LPUSH")
            .arg(key)
            .arg(value)
            .ignore()
            .cmd("LTRIM")
            .arg(key)
            .arg(0)
            .arg(capacity.saturating_sub(1))
            .ignore();
        if let Some(ttl) = ttl {
            pipe.cmd("PEXPIRE").arg(key).arg(millis(ttl)).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn list_range(&self, key: &str, limit: usize) -> StoreResult<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn();
        let values: Vec<String> = redis::cmd("LRANGE")
            .arg(key)
            .arg(0)
            .arg(limit - 1)
            .query_async(&mut conn)
            .await?;
        Ok(values)
    }
}

#[async_trait]
impl PubSubBroker for RedisStore {
    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<u64> {
        let mut conn = self.conn();
        let receivers: u64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription> {
        // Subscriptions need a dedicated connection; the multiplexed one
        // cannot enter subscriber mode.
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| StoreError::Connection(format!("failed to open pubsub connection: {e}")))?;
        pubsub.subscribe(channel).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let name = channel.to_string();
        let forwarder = tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!(channel = %name, error = %e, "Dropping undecodable message");
                        continue;
                    }
                };
                if tx.send(payload).is_err() {
                    break;
                }
            }
            tracing::debug!(channel = %name, "Redis subscription closed");
        });

        Ok(Subscription::new(channel, rx, Some(forwarder)))
    }
}
