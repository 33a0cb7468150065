//! REST API server module.
//!
//! A thin HTTP surface over [`GenerationService`](crate::generation::GenerationService):
//! submit, poll and list generation jobs, plus liveness/readiness probes.

pub mod error;
pub mod routes;
pub mod server;

pub use server::{ApiServer, ApiServerConfig, AppState};
