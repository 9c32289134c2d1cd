use std::sync::Arc;

use tabletop_coordination::{LockService, PresenceService};
use tabletop_core::keys::KeySpace;
use tabletop_events::PubSubService;
use tabletop_queue::QueueService;
use tabletop_store::StoreHandle;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Shared key-value / pub-sub store.
    pub store: StoreHandle,
    pub locks: LockService,
    pub presence: PresenceService,
    pub pubsub: PubSubService,
    pub queue: QueueService,
}

impl AppState {
    /// Wire every coordination service to the same store and key space.
    pub fn new(config: ServerConfig, store: StoreHandle, keys: KeySpace) -> Self {
        Self {
            config: Arc::new(config),
            locks: LockService::new(store.kv.clone(), keys.clone()),
            presence: PresenceService::new(store.kv.clone(), keys.clone()),
            pubsub: PubSubService::new(store.kv.clone(), store.broker.clone(), keys.clone()),
            queue: QueueService::new(store.kv.clone(), keys),
            store,
        }
    }
}
