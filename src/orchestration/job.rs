//! # Partitioned Job
//!
//! Discover partitions, then hand them to the dispatcher. A discovery failure
//! aborts the job before anything is written to the ledger or the broker.

use tracing::error;

use super::PartitionDispatcher;
use crate::discovery::{ColumnRangePartitioner, KeyRangeSource};
use crate::error::BatchResult;
use crate::models::JobResult;

#[derive(Debug)]
pub struct PartitionedJob<S> {
    partitioner: ColumnRangePartitioner<S>,
    dispatcher: PartitionDispatcher,
}

impl<S: KeyRangeSource> PartitionedJob<S> {
    /// Grid size comes from the dispatcher's job configuration
    pub fn new(source: S, dispatcher: PartitionDispatcher) -> Self {
        let grid_size = dispatcher.job_config().grid_size;
        Self {
            partitioner: ColumnRangePartitioner::new(source, grid_size),
            dispatcher,
        }
    }

    pub async fn run(&self) -> BatchResult<JobResult> {
        let partitions = self.partitioner.partition().await.map_err(|e| {
            error!(error = %e, "Partition discovery failed; job not started");
            e
        })?;
        self.dispatcher.execute(&partitions).await
    }
}
