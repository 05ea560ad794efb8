//! # Execution Records
//!
//! Ledger rows for a job execution and its per-partition step executions.
//!
//! ```sql
//! job_execution(id, job_name, status, start_time, end_time, exit_message)
//! execution_record(id, parent_id, name, status, start_time, end_time,
//!                  execution_context, read_count, write_count, exit_message, last_updated)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::FromRow;

use super::PartitionBounds;
use crate::constants::context_keys;
use crate::error::{BatchError, BatchResult};
use crate::state_machine::{ExecutionStatus, JobStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: i64,
    pub job_name: String,
    pub status: JobStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub exit_message: Option<String>,
}

/// One partition's step execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: i64,
    pub parent_id: i64,
    pub name: String,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// `{"minValue": .., "maxValue": ..}` for the owning partition
    pub execution_context: serde_json::Value,
    pub read_count: i64,
    pub write_count: i64,
    pub exit_message: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl StepExecution {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Partition bounds stored in the execution context, when present
    pub fn bounds(&self) -> Option<PartitionBounds> {
        let min = self.execution_context.get(context_keys::MIN_VALUE)?.as_i64()?;
        let max = self.execution_context.get(context_keys::MAX_VALUE)?.as_i64()?;
        Some(PartitionBounds::new(min, max))
    }
}

/// Values the dispatcher supplies when creating a step execution
#[derive(Debug, Clone, PartialEq)]
pub struct NewStepExecution {
    pub parent_id: i64,
    pub name: String,
    pub execution_context: serde_json::Value,
}

impl NewStepExecution {
    pub fn for_partition(parent_id: i64, name: impl Into<String>, bounds: PartitionBounds) -> Self {
        Self {
            parent_id,
            name: name.into(),
            execution_context: json!({
                (context_keys::MIN_VALUE): bounds.lower,
                (context_keys::MAX_VALUE): bounds.upper,
            }),
        }
    }
}

/// Terminal update written by a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub status: ExecutionStatus,
    pub read_count: i64,
    pub write_count: i64,
    pub exit_message: Option<String>,
}

impl StepOutcome {
    pub fn completed(read_count: i64, write_count: i64) -> Self {
        Self {
            status: ExecutionStatus::Completed,
            read_count,
            write_count,
            exit_message: None,
        }
    }

    pub fn failed(exit_message: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            read_count: 0,
            write_count: 0,
            exit_message: Some(exit_message.into()),
        }
    }

    pub fn stopped(read_count: i64, write_count: i64, exit_message: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Stopped,
            read_count,
            write_count,
            exit_message: Some(exit_message.into()),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct JobExecutionRow {
    pub id: i64,
    pub job_name: String,
    pub status: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub exit_message: Option<String>,
}

impl TryFrom<JobExecutionRow> for JobExecution {
    type Error = BatchError;

    fn try_from(row: JobExecutionRow) -> BatchResult<Self> {
        let status = row.status.parse::<JobStatus>().map_err(BatchError::Validation)?;
        Ok(Self {
            id: row.id,
            job_name: row.job_name,
            status,
            start_time: row.start_time,
            end_time: row.end_time,
            exit_message: row.exit_message,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct StepExecutionRow {
    pub id: i64,
    pub parent_id: i64,
    pub name: String,
    pub status: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub execution_context: serde_json::Value,
    pub read_count: i64,
    pub write_count: i64,
    pub exit_message: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl TryFrom<StepExecutionRow> for StepExecution {
    type Error = BatchError;

    fn try_from(row: StepExecutionRow) -> BatchResult<Self> {
        let status = row
            .status
            .parse::<ExecutionStatus>()
            .map_err(BatchError::Validation)?;
        Ok(Self {
            id: row.id,
            parent_id: row.parent_id,
            name: row.name,
            status,
            start_time: row.start_time,
            end_time: row.end_time,
            execution_context: row.execution_context,
            read_count: row.read_count,
            write_count: row.write_count,
            exit_message: row.exit_message,
            last_updated: row.last_updated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_step_execution_context() {
        let new = NewStepExecution::for_partition(1, "slaveStep:partition0", PartitionBounds::new(1, 1000));
        assert_eq!(new.execution_context, json!({"minValue": 1, "maxValue": 1000}));
    }

    #[test]
    fn test_row_conversion_rejects_unknown_status() {
        let now = Utc::now();
        let row = StepExecutionRow {
            id: 1,
            parent_id: 1,
            name: "slaveStep:partition0".to_string(),
            status: "RUNNING".to_string(),
            start_time: now,
            end_time: None,
            execution_context: json!({"minValue": 1, "maxValue": 10}),
            read_count: 0,
            write_count: 0,
            exit_message: None,
            last_updated: now,
        };
        assert!(StepExecution::try_from(row.clone()).is_err());

        let ok = StepExecution::try_from(StepExecutionRow {
            status: "STARTED".to_string(),
            ..row
        })
        .unwrap();
        assert_eq!(ok.status, ExecutionStatus::Started);
        assert_eq!(ok.bounds(), Some(PartitionBounds::new(1, 10)));
    }
}
