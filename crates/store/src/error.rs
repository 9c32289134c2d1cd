//! Error types for the store client.
//!
//! Every failure talking to the shared store is a [`StoreError`]. Callers
//! treat all of them as transient infrastructure errors; logical outcomes
//! such as "key already present" are reported through return values, never
//! through this type.

use thiserror::Error;

/// Failure of a store operation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An error originating from the Redis protocol layer.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A stored value could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store could not be reached.
    #[error("connection error: {0}")]
    Connection(String),

    /// A key holds a value of a different type than the operation expects.
    #[error("wrong type for key: {0}")]
    WrongType(String),

    /// A response could not be parsed into the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The operation did not complete in time.
    #[error("operation timed out after {0}ms")]
    Timeout(u64),
}

/// Convenience alias used throughout the store crate and its callers.
pub type StoreResult<T> = Result<T, StoreError>;
