use tabletop_core::error::CoreError;
use tabletop_store::StoreError;

/// Errors from publishing or reading game channels.
#[derive(Debug, thiserror::Error)]
pub enum PubSubError {
    /// The message was rejected before touching the store.
    #[error("invalid message: {0}")]
    Invalid(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<serde_json::Error> for PubSubError {
    fn from(e: serde_json::Error) -> Self {
        Self::Store(StoreError::Serialization(e))
    }
}

pub type PubSubResult<T> = Result<T, PubSubError>;
