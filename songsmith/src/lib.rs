//! songsmith library crate.
//!
//! Background orchestration of multi-step content generation jobs: durable
//! progress tracking, best-effort batches, cooperative cancellation on
//! shutdown and startup recovery of jobs orphaned by a crash.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod generation;
pub mod logging;
pub mod services;

pub use error::{Error, Result};
