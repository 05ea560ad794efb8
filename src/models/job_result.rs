//! # Job Result
//!
//! What the master reports after a partitioned job finishes or times out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StepExecution;
use crate::error::{BatchError, BatchResult};
use crate::state_machine::{ExecutionStatus, JobStatus};

/// Final view of one partition's step execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionOutcome {
    pub execution_id: i64,
    pub name: String,
    pub status: ExecutionStatus,
    pub read_count: i64,
    pub write_count: i64,
    pub exit_message: Option<String>,
}

impl From<&StepExecution> for PartitionOutcome {
    fn from(execution: &StepExecution) -> Self {
        Self {
            execution_id: execution.id,
            name: execution.name.clone(),
            status: execution.status,
            read_count: execution.read_count,
            write_count: execution.write_count,
            exit_message: execution.exit_message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_execution_id: i64,
    pub job_name: String,
    pub status: JobStatus,
    pub partitions: Vec<PartitionOutcome>,
    /// The poll deadline elapsed before every partition was terminal
    pub timed_out: bool,
    /// Executions marked UNKNOWN by the deadline
    pub unresolved: Vec<i64>,
    /// Requests the transport failed to publish, with the reason
    pub dispatch_failures: Vec<(i64, String)>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }

    pub fn total_rows_read(&self) -> i64 {
        self.partitions.iter().map(|p| p.read_count).sum()
    }

    pub fn total_rows_written(&self) -> i64 {
        self.partitions.iter().map(|p| p.write_count).sum()
    }

    pub fn failed_partitions(&self) -> impl Iterator<Item = &PartitionOutcome> {
        self.partitions.iter().filter(|p| p.status.is_failure())
    }

    /// `Ok` when the job completed; the matching error otherwise
    pub fn into_result(self) -> BatchResult<JobResult> {
        if self.is_success() {
            Ok(self)
        } else if self.timed_out {
            Err(BatchError::Timeout {
                job_execution_id: self.job_execution_id,
                unresolved: self.unresolved.len(),
            })
        } else {
            Err(BatchError::JobFailed {
                job_execution_id: self.job_execution_id,
                status: self.status.to_string(),
            })
        }
    }
}
