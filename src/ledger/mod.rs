//! # Execution Ledger
//!
//! Durable record of every job execution and partition step execution. The
//! ledger, not the reply channel, decides whether a partition is done.
//!
//! Every status change is a conditional single-row update: it applies only
//! when the row is currently in one of the source states the transition guard
//! allows. Callers learn whether their write won, which is what makes claims
//! atomic and redelivered requests harmless.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;

use crate::error::BatchResult;
use crate::models::{JobExecution, NewStepExecution, StepExecution, StepOutcome};
use crate::state_machine::JobStatus;

pub use in_memory::InMemoryExecutionLedger;
pub use postgres::PgExecutionLedger;

/// Result of trying to move a step execution from STARTING to STARTED
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// This caller now owns the execution
    Claimed(StepExecution),
    /// Someone else claimed it first, or it is already terminal
    NotClaimable(StepExecution),
}

#[async_trait]
pub trait ExecutionLedger: Send + Sync + 'static {
    /// Create a job execution in STARTED
    async fn create_job_execution(&self, job_name: &str) -> BatchResult<JobExecution>;

    /// Set the job's final status and end time
    async fn complete_job_execution(
        &self,
        job_execution_id: i64,
        status: JobStatus,
        exit_message: Option<String>,
    ) -> BatchResult<JobExecution>;

    /// Fails with `ExecutionNotFound` when absent
    async fn get_job_execution(&self, job_execution_id: i64) -> BatchResult<JobExecution>;

    /// Create a step execution in STARTING
    async fn create_step_execution(&self, new: NewStepExecution) -> BatchResult<StepExecution>;

    async fn get_step_execution(&self, execution_id: i64) -> BatchResult<Option<StepExecution>>;

    /// Step executions with the given ids, ordered by id; unknown ids are skipped
    async fn get_step_executions(&self, execution_ids: &[i64]) -> BatchResult<Vec<StepExecution>>;

    async fn step_executions_for_job(&self, job_execution_id: i64)
        -> BatchResult<Vec<StepExecution>>;

    /// STARTING -> STARTED. Fails with `ExecutionNotFound` when absent.
    async fn claim_step_execution(&self, execution_id: i64) -> BatchResult<ClaimOutcome>;

    /// Write a worker's terminal outcome.
    ///
    /// Returns the updated execution, or `None` when the record was not in a
    /// state the outcome may be written from (already terminal).
    async fn record_step_outcome(
        &self,
        execution_id: i64,
        outcome: &StepOutcome,
    ) -> BatchResult<Option<StepExecution>>;

    /// STARTING -> FAILED for a request the worker cannot run.
    ///
    /// Returns `None` and leaves the record alone when it is no longer
    /// STARTING: a claimed record belongs to the worker that claimed it.
    async fn reject_step_execution(
        &self,
        execution_id: i64,
        exit_message: &str,
    ) -> BatchResult<Option<StepExecution>>;

    /// Mark still non-terminal executions UNKNOWN; returns the ids actually marked
    async fn mark_unknown(&self, execution_ids: &[i64], exit_message: &str)
        -> BatchResult<Vec<i64>>;
}
