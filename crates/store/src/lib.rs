//! Store client for the shared key-value / pub-sub backend.
//!
//! - [`KeyValueStore`] / [`PubSubBroker`]: the atomic primitives every
//!   coordination service is written against.
//! - [`RedisStore`]: production implementation over Redis.
//! - [`MemoryStore`]: in-process implementation with the same atomicity
//!   contracts and soft TTLs, used by tests and single-process deployments.
//! - [`StoreHandle`]: the injected pair of trait objects handed to services.

pub mod config;
pub mod error;
pub mod memory;
pub mod redis_store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;

use std::sync::Arc;
use std::time::Duration;

pub use config::{StoreBackend, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use traits::{KeyValueStore, PubSubBroker, ScoredMember, Subscription};

/// Shared handle to the store, cheaply cloneable.
///
/// Both fields usually point at the same underlying client; they are kept
/// as separate trait objects so services depend only on what they use.
#[derive(Clone)]
pub struct StoreHandle {
    pub kv: Arc<dyn KeyValueStore>,
    pub broker: Arc<dyn PubSubBroker>,
    /// Set when the backend is a [`MemoryStore`], so callers can run its sweeper.
    pub memory: Option<Arc<MemoryStore>>,
}

impl StoreHandle {
    /// Build a handle from any type implementing both traits.
    pub fn new<S>(store: Arc<S>) -> Self
    where
        S: KeyValueStore + PubSubBroker + 'static,
    {
        Self {
            kv: store.clone(),
            broker: store,
            memory: None,
        }
    }

    /// Build a handle over a fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::from_memory(Arc::new(MemoryStore::new()))
    }

    /// Build a handle over an existing [`MemoryStore`].
    pub fn from_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            kv: store.clone(),
            broker: store.clone(),
            memory: Some(store),
        }
    }
}

/// Connect to the backend described by `config`.
pub async fn connect(config: &StoreConfig) -> StoreResult<StoreHandle> {
    match config.backend {
        StoreBackend::Redis => {
            let store = RedisStore::connect(&config.redis_url).await?;
            Ok(StoreHandle::new(Arc::new(store)))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; coordination is limited to this process");
            Ok(StoreHandle::in_memory())
        }
    }
}

/// How long a health check waits for the store to answer.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// Round-trip to the store, giving up after [`HEALTH_CHECK_TIMEOUT`].
pub async fn health_check(store: &StoreHandle) -> StoreResult<()> {
    match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, store.kv.ping()).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(HEALTH_CHECK_TIMEOUT.as_millis() as u64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use testing::FaultyStore;

    #[tokio::test]
    async fn health_check_passes_on_responsive_store() {
        health_check(&StoreHandle::in_memory()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn health_check_times_out_on_stalled_store() {
        let store = FaultyStore::new();
        let _gate = store.pause_after("ping", "");

        assert_matches!(
            health_check(&store.handle()).await,
            Err(StoreError::Timeout(2_000))
        );
    }
}
