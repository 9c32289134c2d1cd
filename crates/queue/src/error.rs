use tabletop_core::error::CoreError;
use tabletop_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The request was rejected before touching the store.
    #[error("invalid job: {0}")]
    Invalid(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<serde_json::Error> for QueueError {
    fn from(e: serde_json::Error) -> Self {
        Self::Store(StoreError::Serialization(e))
    }
}

pub type QueueResult<T> = Result<T, QueueError>;
