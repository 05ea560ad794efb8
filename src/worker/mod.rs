//! # Worker
//!
//! Worker-side request handling: the per-request protocol in [`handler`] and
//! the competing-consumer loops in [`pool`].

pub mod handler;
pub mod pool;

pub use handler::WorkerRequestHandler;
pub use pool::{WorkerPool, WorkerPoolStats, WorkerPoolStatsSnapshot};
