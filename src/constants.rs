//! # System Constants
//!
//! Queue names, execution-context keys and defaults shared by the master and
//! worker processes. Both sides must agree on these values, so they live in
//! one place.

/// Work requests, consumed by competing workers.
pub const DEFAULT_REQUEST_QUEUE: &str = "partition_requests";

/// Replies from workers back to the dispatcher.
pub const DEFAULT_REPLY_QUEUE: &str = "partition_replies";

/// Step name the master dispatches and workers register by default.
pub const DEFAULT_STEP_NAME: &str = "slaveStep";

pub const DEFAULT_JOB_NAME: &str = "job";

pub const DEFAULT_GRID_SIZE: u32 = 4;

/// Execution context keys carried on every work request.
pub mod context_keys {
    pub const MIN_VALUE: &str = "minValue";
    pub const MAX_VALUE: &str = "maxValue";
}

/// Timing defaults (milliseconds unless noted).
pub mod timing {
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
    pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 60_000_000;
    pub const DEFAULT_REPLY_POLL_INTERVAL_MS: u64 = 100;
    pub const DEFAULT_WORKER_POLL_INTERVAL_MS: u64 = 250;
    pub const DEFAULT_VISIBILITY_TIMEOUT_SECONDS: u64 = 300;
}

/// Chunking defaults for the read/write pipeline.
pub mod chunking {
    pub const DEFAULT_PAGE_SIZE: u32 = 1_000;
    pub const DEFAULT_CHUNK_SIZE: u32 = 1_000;
}

/// Name given to the step execution for partition `index`.
pub fn partition_execution_name(step_name: &str, index: usize) -> String {
    format!("{step_name}:partition{index}")
}
