//! Postgres ledger over the `job_execution` / `execution_record` tables.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use super::{ClaimOutcome, ExecutionLedger};
use crate::error::{BatchError, BatchResult};
use crate::models::execution::{JobExecutionRow, StepExecutionRow};
use crate::models::{JobExecution, NewStepExecution, StepExecution, StepOutcome};
use crate::state_machine::{ExecutionStatus, JobStatus, TransitionActor, TransitionGuard};

const JOB_COLUMNS: &str = "id, job_name, status, start_time, end_time, exit_message";

const STEP_COLUMNS: &str = "id, parent_id, name, status, start_time, end_time, \
     execution_context, read_count, write_count, exit_message, last_updated";

#[derive(Debug, Clone)]
pub struct PgExecutionLedger {
    pool: PgPool,
}

impl PgExecutionLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn status_names(statuses: &[ExecutionStatus]) -> Vec<String> {
        statuses.iter().map(|s| s.to_string()).collect()
    }
}

#[async_trait]
impl ExecutionLedger for PgExecutionLedger {
    async fn create_job_execution(&self, job_name: &str) -> BatchResult<JobExecution> {
        let row = sqlx::query_as::<_, JobExecutionRow>(&format!(
            "INSERT INTO job_execution (job_name, status, start_time) \
             VALUES ($1, $2, NOW()) RETURNING {JOB_COLUMNS}"
        ))
        .bind(job_name)
        .bind(JobStatus::Started.as_str())
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn complete_job_execution(
        &self,
        job_execution_id: i64,
        status: JobStatus,
        exit_message: Option<String>,
    ) -> BatchResult<JobExecution> {
        let row = sqlx::query_as::<_, JobExecutionRow>(&format!(
            "UPDATE job_execution SET status = $2, end_time = NOW(), exit_message = $3 \
             WHERE id = $1 RETURNING {JOB_COLUMNS}"
        ))
        .bind(job_execution_id)
        .bind(status.as_str())
        .bind(exit_message)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(BatchError::ExecutionNotFound(job_execution_id))?;

        row.try_into()
    }

    async fn get_job_execution(&self, job_execution_id: i64) -> BatchResult<JobExecution> {
        let row = sqlx::query_as::<_, JobExecutionRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM job_execution WHERE id = $1"
        ))
        .bind(job_execution_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(BatchError::ExecutionNotFound(job_execution_id))?;

        row.try_into()
    }

    async fn create_step_execution(&self, new: NewStepExecution) -> BatchResult<StepExecution> {
        let row = sqlx::query_as::<_, StepExecutionRow>(&format!(
            "INSERT INTO execution_record (parent_id, name, status, start_time, execution_context, last_updated) \
             VALUES ($1, $2, $3, NOW(), $4, NOW()) RETURNING {STEP_COLUMNS}"
        ))
        .bind(new.parent_id)
        .bind(&new.name)
        .bind(ExecutionStatus::Starting.as_str())
        .bind(&new.execution_context)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn get_step_execution(&self, execution_id: i64) -> BatchResult<Option<StepExecution>> {
        sqlx::query_as::<_, StepExecutionRow>(&format!(
            "SELECT {STEP_COLUMNS} FROM execution_record WHERE id = $1"
        ))
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await?
        .map(StepExecution::try_from)
        .transpose()
    }

    async fn get_step_executions(&self, execution_ids: &[i64]) -> BatchResult<Vec<StepExecution>> {
        sqlx::query_as::<_, StepExecutionRow>(&format!(
            "SELECT {STEP_COLUMNS} FROM execution_record WHERE id = ANY($1) ORDER BY id"
        ))
        .bind(execution_ids)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(StepExecution::try_from)
        .collect()
    }

    async fn step_executions_for_job(
        &self,
        job_execution_id: i64,
    ) -> BatchResult<Vec<StepExecution>> {
        sqlx::query_as::<_, StepExecutionRow>(&format!(
            "SELECT {STEP_COLUMNS} FROM execution_record WHERE parent_id = $1 ORDER BY id"
        ))
        .bind(job_execution_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(StepExecution::try_from)
        .collect()
    }

    async fn claim_step_execution(&self, execution_id: i64) -> BatchResult<ClaimOutcome> {
        let sources = Self::status_names(&TransitionGuard::allowed_sources(
            ExecutionStatus::Started,
            TransitionActor::Worker,
        ));

        let claimed = sqlx::query_as::<_, StepExecutionRow>(&format!(
            "UPDATE execution_record SET status = $2, last_updated = NOW() \
             WHERE id = $1 AND status = ANY($3) RETURNING {STEP_COLUMNS}"
        ))
        .bind(execution_id)
        .bind(ExecutionStatus::Started.as_str())
        .bind(&sources)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = claimed {
            return Ok(ClaimOutcome::Claimed(row.try_into()?));
        }

        let current = self
            .get_step_execution(execution_id)
            .await?
            .ok_or(BatchError::ExecutionNotFound(execution_id))?;
        debug!(
            execution_id,
            status = %current.status,
            "Claim lost; execution not in STARTING"
        );
        Ok(ClaimOutcome::NotClaimable(current))
    }

    async fn record_step_outcome(
        &self,
        execution_id: i64,
        outcome: &StepOutcome,
    ) -> BatchResult<Option<StepExecution>> {
        let sources = Self::status_names(&TransitionGuard::allowed_sources(
            outcome.status,
            TransitionActor::Worker,
        ));
        if sources.is_empty() {
            return Err(BatchError::Validation(format!(
                "{} is not a worker outcome",
                outcome.status
            )));
        }

        let updated = sqlx::query_as::<_, StepExecutionRow>(&format!(
            "UPDATE execution_record \
             SET status = $2, read_count = $3, write_count = $4, exit_message = $5, \
                 end_time = NOW(), last_updated = NOW() \
             WHERE id = $1 AND status = ANY($6) RETURNING {STEP_COLUMNS}"
        ))
        .bind(execution_id)
        .bind(outcome.status.as_str())
        .bind(outcome.read_count)
        .bind(outcome.write_count)
        .bind(&outcome.exit_message)
        .bind(&sources)
        .fetch_optional(&self.pool)
        .await?;

        updated.map(StepExecution::try_from).transpose()
    }

    async fn reject_step_execution(
        &self,
        execution_id: i64,
        exit_message: &str,
    ) -> BatchResult<Option<StepExecution>> {
        let sources = Self::status_names(&TransitionGuard::allowed_sources(
            ExecutionStatus::Failed,
            TransitionActor::RejectingWorker,
        ));

        let rejected = sqlx::query_as::<_, StepExecutionRow>(&format!(
            "UPDATE execution_record \
             SET status = $2, exit_message = $3, end_time = NOW(), last_updated = NOW() \
             WHERE id = $1 AND status = ANY($4) RETURNING {STEP_COLUMNS}"
        ))
        .bind(execution_id)
        .bind(ExecutionStatus::Failed.as_str())
        .bind(exit_message)
        .bind(&sources)
        .fetch_optional(&self.pool)
        .await?;

        rejected.map(StepExecution::try_from).transpose()
    }

    async fn mark_unknown(
        &self,
        execution_ids: &[i64],
        exit_message: &str,
    ) -> BatchResult<Vec<i64>> {
        let sources = Self::status_names(ExecutionStatus::non_terminal());

        let ids: Vec<(i64,)> = sqlx::query_as(
            "UPDATE execution_record \
             SET status = $2, exit_message = $3, end_time = NOW(), last_updated = NOW() \
             WHERE id = ANY($1) AND status = ANY($4) RETURNING id",
        )
        .bind(execution_ids)
        .bind(ExecutionStatus::Unknown.as_str())
        .bind(exit_message)
        .bind(&sources)
        .fetch_all(&self.pool)
        .await?;

        let mut ids: Vec<i64> = ids.into_iter().map(|(id,)| id).collect();
        ids.sort_unstable();
        Ok(ids)
    }
}
