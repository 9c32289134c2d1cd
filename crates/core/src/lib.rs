//! Shared types for the tabletop coordination layer.
//!
//! This crate has zero internal dependencies so the store client, the
//! services, the API and the worker can all agree on error types, key
//! naming, coordination constants, and the uniform result envelope.

pub mod coordination;
pub mod error;
pub mod keys;
pub mod result;
pub mod types;
