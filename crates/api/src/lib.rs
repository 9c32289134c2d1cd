//! Tabletop coordination API server library.
//!
//! Exposes the building blocks (config, state, error handling, routes, the
//! session-start use case, diagnostics) so integration tests and the binary
//! entrypoint can both access them.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod router;
pub mod routes;
pub mod session;
pub mod state;
