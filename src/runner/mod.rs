//! # Partition Runners
//!
//! The unit of work a worker executes for one partition: read every row whose
//! key falls in the partition's inclusive bounds and write it somewhere else.
//!
//! Runners are looked up by step name through a [`StepRegistry`] that is
//! built once at process start and never mutated afterwards.
//!
//! ## Contract
//!
//! - `run` is restartable from the start of the range.
//! - An empty range (`lower > upper`) is a successful no-op.
//! - Any unrecoverable read or write fault is a [`RunnerError::Processing`].

pub mod customer;
pub mod registry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::PartitionBounds;

pub use customer::{CustomerMigrationRunner, CustomerRecord, RowTransform};
pub use registry::{StepRegistry, StepRegistryBuilder};

/// Row counts reported by a finished runner
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub read_count: i64,
    pub write_count: i64,
}

impl RunSummary {
    pub fn new(read_count: i64, write_count: i64) -> Self {
        Self {
            read_count,
            write_count,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RunnerError {
    /// Unrecoverable read/transform/write fault
    #[error("Processing failed: {0}")]
    Processing(String),

    /// The runner gave up before finishing the range
    #[error("Stopped after {read_count} rows: {reason}")]
    Stopped {
        reason: String,
        read_count: i64,
        write_count: i64,
    },

    #[error("Database error: {0}")]
    Database(String),
}

impl RunnerError {
    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing(message.into())
    }

    pub fn stopped(reason: impl Into<String>, summary: RunSummary) -> Self {
        Self::Stopped {
            reason: reason.into(),
            read_count: summary.read_count,
            write_count: summary.write_count,
        }
    }
}

impl From<sqlx::Error> for RunnerError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            // Constraint violations and bad data are faults of this partition's rows
            sqlx::Error::Database(db) => Self::Processing(db.to_string()),
            other => Self::Database(other.to_string()),
        }
    }
}

#[async_trait]
pub trait PartitionRunner: Send + Sync + 'static {
    async fn run(
        &self,
        execution_id: i64,
        bounds: PartitionBounds,
    ) -> Result<RunSummary, RunnerError>;
}
