//! # Execution State Management
//!
//! Status enums for partition and job executions plus the guard that keeps
//! transitions monotonic.

pub mod guards;
pub mod states;

pub use guards::{TransitionActor, TransitionGuard};
pub use states::{ExecutionStatus, JobStatus};
