//! Background job worker for the tabletop coordination layer.
//!
//! - [`JobRunner`]: polls queues, dispatches jobs to handlers, recovers
//!   stalled jobs.
//! - [`JobHandler`] / [`HandlerRegistry`]: the per-job-type execution seam.
//! - [`SessionSetupHandler`]: finishes session start in the background.

pub mod config;
pub mod handler;
pub mod runner;
pub mod session_setup;

pub use config::WorkerConfig;
pub use handler::{HandlerRegistry, JobHandler};
pub use runner::JobRunner;
pub use session_setup::SessionSetupHandler;
