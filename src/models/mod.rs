//! # Data Models
//!
//! Partitions, ledger records and job results.

pub mod execution;
pub mod job_result;
pub mod partition;

pub use execution::{JobExecution, NewStepExecution, StepExecution, StepOutcome};
pub use job_result::{JobResult, PartitionOutcome};
pub use partition::{Partition, PartitionBounds};
