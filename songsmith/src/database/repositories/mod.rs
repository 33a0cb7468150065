//! Repository layer for database access.
//!
//! Every query goes through [`with_retry`](crate::database::with_retry) so a
//! busy or briefly unreachable store is retried before an error surfaces.

pub mod catalog;
pub mod job;

pub use catalog::*;
pub use job::*;
