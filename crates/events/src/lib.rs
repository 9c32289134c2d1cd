//! Game event and chat broadcasting for the tabletop coordination layer.
//!
//! - [`PubSubService`]: publishes [`GameEvent`]s and [`ChatMessage`]s on a
//!   per-game channel and records them in a bounded per-channel history for
//!   clients that poll instead of subscribing.
//! - [`EventSubscription`]: live stream of everything published on a game.

pub mod error;
pub mod message;
pub mod service;
pub mod subscription;

pub use error::{PubSubError, PubSubResult};
pub use message::{ChannelMessage, ChatMessage, ChatMessageType, GameEvent};
pub use service::{BulkFailure, BulkPublishReport, ChannelStats, PubSubService};
pub use subscription::EventSubscription;
