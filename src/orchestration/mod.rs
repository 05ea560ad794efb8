//! # Orchestration
//!
//! Master-side coordination of a partitioned job.
//!
//! ```text
//! PartitionedJob ──discover──> ColumnRangePartitioner
//!       │
//!       └──execute──> PartitionDispatcher ──publish──> MessageTransport
//!                            │
//!                            └──poll──> ExecutionLedger
//! ```

pub mod dispatcher;
pub mod job;

pub use dispatcher::PartitionDispatcher;
pub use job::PartitionedJob;
