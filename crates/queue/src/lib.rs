//! Priority- and delay-aware job queue on the shared store.
//!
//! - [`QueueService`]: enqueue, claim, complete, fail, and inspect jobs.
//! - [`Job`] / [`JobStatus`]: the persisted job record and its state machine.
//! - [`RetryPolicy`]: exponential backoff between attempts.

pub mod error;
pub mod job;
pub mod service;

pub use error::{QueueError, QueueResult};
pub use job::{Job, JobOptions, JobStatus, RetryPolicy};
pub use service::{JobCompletion, JobFailure, QueueService, QueueStats};
