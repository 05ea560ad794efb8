//! In-process ledger backed by `DashMap`.
//!
//! Each conditional update holds the entry's shard lock for the
//! check-and-write, matching the single-row atomicity of the Postgres ledger.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use super::{ClaimOutcome, ExecutionLedger};
use crate::error::{BatchError, BatchResult};
use crate::models::{JobExecution, NewStepExecution, StepExecution, StepOutcome};
use crate::state_machine::{ExecutionStatus, JobStatus, TransitionActor, TransitionGuard};

#[derive(Debug)]
pub struct InMemoryExecutionLedger {
    jobs: DashMap<i64, JobExecution>,
    steps: DashMap<i64, StepExecution>,
    next_job_id: AtomicI64,
    next_step_id: AtomicI64,
}

impl Default for InMemoryExecutionLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryExecutionLedger {
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
            steps: DashMap::new(),
            next_job_id: AtomicI64::new(1),
            next_step_id: AtomicI64::new(1),
        }
    }

    /// Number of step executions stored (for testing)
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Apply `to` when the guard allows it from the row's current status
    fn transition(
        &self,
        execution_id: i64,
        to: ExecutionStatus,
        actor: TransitionActor,
        apply: impl FnOnce(&mut StepExecution),
    ) -> BatchResult<Result<StepExecution, StepExecution>> {
        let mut entry = self
            .steps
            .get_mut(&execution_id)
            .ok_or(BatchError::ExecutionNotFound(execution_id))?;

        if !TransitionGuard::is_allowed(entry.status, to, actor) {
            return Ok(Err(entry.clone()));
        }

        let now = Utc::now();
        entry.status = to;
        entry.last_updated = now;
        if to.is_terminal() {
            entry.end_time = Some(now);
        }
        apply(entry.value_mut());
        Ok(Ok(entry.clone()))
    }
}

#[async_trait]
impl ExecutionLedger for InMemoryExecutionLedger {
    async fn create_job_execution(&self, job_name: &str) -> BatchResult<JobExecution> {
        let id = self.next_job_id.fetch_add(1, Ordering::SeqCst);
        let job = JobExecution {
            id,
            job_name: job_name.to_string(),
            status: JobStatus::Started,
            start_time: Utc::now(),
            end_time: None,
            exit_message: None,
        };
        self.jobs.insert(id, job.clone());
        Ok(job)
    }

    async fn complete_job_execution(
        &self,
        job_execution_id: i64,
        status: JobStatus,
        exit_message: Option<String>,
    ) -> BatchResult<JobExecution> {
        let mut job = self
            .jobs
            .get_mut(&job_execution_id)
            .ok_or(BatchError::ExecutionNotFound(job_execution_id))?;
        job.status = status;
        job.end_time = Some(Utc::now());
        job.exit_message = exit_message;
        Ok(job.clone())
    }

    async fn get_job_execution(&self, job_execution_id: i64) -> BatchResult<JobExecution> {
        self.jobs
            .get(&job_execution_id)
            .map(|job| job.clone())
            .ok_or(BatchError::ExecutionNotFound(job_execution_id))
    }

    async fn create_step_execution(&self, new: NewStepExecution) -> BatchResult<StepExecution> {
        if !self.jobs.contains_key(&new.parent_id) {
            return Err(BatchError::ExecutionNotFound(new.parent_id));
        }

        let id = self.next_step_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let step = StepExecution {
            id,
            parent_id: new.parent_id,
            name: new.name,
            status: ExecutionStatus::Starting,
            start_time: now,
            end_time: None,
            execution_context: new.execution_context,
            read_count: 0,
            write_count: 0,
            exit_message: None,
            last_updated: now,
        };
        self.steps.insert(id, step.clone());
        Ok(step)
    }

    async fn get_step_execution(&self, execution_id: i64) -> BatchResult<Option<StepExecution>> {
        Ok(self.steps.get(&execution_id).map(|step| step.clone()))
    }

    async fn get_step_executions(&self, execution_ids: &[i64]) -> BatchResult<Vec<StepExecution>> {
        let mut steps: Vec<StepExecution> = execution_ids
            .iter()
            .filter_map(|id| self.steps.get(id).map(|step| step.clone()))
            .collect();
        steps.sort_by_key(|step| step.id);
        steps.dedup_by_key(|step| step.id);
        Ok(steps)
    }

    async fn step_executions_for_job(
        &self,
        job_execution_id: i64,
    ) -> BatchResult<Vec<StepExecution>> {
        let mut steps: Vec<StepExecution> = self
            .steps
            .iter()
            .filter(|entry| entry.parent_id == job_execution_id)
            .map(|entry| entry.value().clone())
            .collect();
        steps.sort_by_key(|step| step.id);
        Ok(steps)
    }

    async fn claim_step_execution(&self, execution_id: i64) -> BatchResult<ClaimOutcome> {
        let result = self.transition(
            execution_id,
            ExecutionStatus::Started,
            TransitionActor::Worker,
            |_| {},
        )?;
        Ok(match result {
            Ok(step) => ClaimOutcome::Claimed(step),
            Err(current) => ClaimOutcome::NotClaimable(current),
        })
    }

    async fn record_step_outcome(
        &self,
        execution_id: i64,
        outcome: &StepOutcome,
    ) -> BatchResult<Option<StepExecution>> {
        let result = self.transition(
            execution_id,
            outcome.status,
            TransitionActor::Worker,
            |step| {
                step.read_count = outcome.read_count;
                step.write_count = outcome.write_count;
                step.exit_message = outcome.exit_message.clone();
            },
        )?;
        Ok(result.ok())
    }

    async fn reject_step_execution(
        &self,
        execution_id: i64,
        exit_message: &str,
    ) -> BatchResult<Option<StepExecution>> {
        let result = self.transition(
            execution_id,
            ExecutionStatus::Failed,
            TransitionActor::RejectingWorker,
            |step| step.exit_message = Some(exit_message.to_string()),
        )?;
        Ok(result.ok())
    }

    async fn mark_unknown(
        &self,
        execution_ids: &[i64],
        exit_message: &str,
    ) -> BatchResult<Vec<i64>> {
        let mut marked = Vec::new();
        for &id in execution_ids {
            let result = match self.transition(
                id,
                ExecutionStatus::Unknown,
                TransitionActor::Dispatcher,
                |step| step.exit_message = Some(exit_message.to_string()),
            ) {
                Ok(result) => result,
                Err(BatchError::ExecutionNotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            if result.is_ok() {
                marked.push(id);
            }
        }
        Ok(marked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PartitionBounds;

    async fn ledger_with_step() -> (InMemoryExecutionLedger, JobExecution, StepExecution) {
        let ledger = InMemoryExecutionLedger::new();
        let job = ledger.create_job_execution("job").await.unwrap();
        let step = ledger
            .create_step_execution(NewStepExecution::for_partition(
                job.id,
                "slaveStep:partition0",
                PartitionBounds::new(1, 100),
            ))
            .await
            .unwrap();
        (ledger, job, step)
    }

    #[tokio::test]
    async fn test_step_requires_parent() {
        let ledger = InMemoryExecutionLedger::new();
        let result = ledger
            .create_step_execution(NewStepExecution::for_partition(
                42,
                "slaveStep:partition0",
                PartitionBounds::new(1, 2),
            ))
            .await;
        assert!(matches!(result, Err(BatchError::ExecutionNotFound(42))));
    }

    #[tokio::test]
    async fn test_claim_only_once() {
        let (ledger, _, step) = ledger_with_step().await;
        assert_eq!(step.status, ExecutionStatus::Starting);

        let first = ledger.claim_step_execution(step.id).await.unwrap();
        assert!(matches!(first, ClaimOutcome::Claimed(ref s) if s.status == ExecutionStatus::Started));

        let second = ledger.claim_step_execution(step.id).await.unwrap();
        assert!(matches!(second, ClaimOutcome::NotClaimable(ref s) if s.status == ExecutionStatus::Started));

        assert!(matches!(
            ledger.claim_step_execution(999).await,
            Err(BatchError::ExecutionNotFound(999))
        ));
    }

    #[tokio::test]
    async fn test_terminal_outcome_written_once() {
        let (ledger, _, step) = ledger_with_step().await;
        ledger.claim_step_execution(step.id).await.unwrap();

        let done = ledger
            .record_step_outcome(step.id, &StepOutcome::completed(100, 100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, ExecutionStatus::Completed);
        assert_eq!(done.write_count, 100);
        assert!(done.end_time.is_some());

        let again = ledger
            .record_step_outcome(step.id, &StepOutcome::failed("late"))
            .await
            .unwrap();
        assert!(again.is_none());

        let stored = ledger.get_step_execution(step.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
        assert!(stored.exit_message.is_none());
    }

    #[tokio::test]
    async fn test_completed_requires_claim() {
        let (ledger, _, step) = ledger_with_step().await;
        let result = ledger
            .record_step_outcome(step.id, &StepOutcome::completed(1, 1))
            .await
            .unwrap();
        assert!(result.is_none());

        let failed = ledger
            .record_step_outcome(step.id, &StepOutcome::failed("boom"))
            .await
            .unwrap();
        assert!(failed.is_none());
        let stored = ledger.get_step_execution(step.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Starting);
    }

    #[tokio::test]
    async fn test_reject_only_from_starting() {
        let (ledger, job, step) = ledger_with_step().await;
        let rejected = ledger
            .reject_step_execution(step.id, "Unknown step: nope")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rejected.status, ExecutionStatus::Failed);
        assert_eq!(rejected.exit_message.as_deref(), Some("Unknown step: nope"));
        assert!(rejected.end_time.is_some());

        let claimed = ledger
            .create_step_execution(NewStepExecution::for_partition(
                job.id,
                "slaveStep:partition1",
                PartitionBounds::new(101, 200),
            ))
            .await
            .unwrap();
        ledger.claim_step_execution(claimed.id).await.unwrap();
        assert!(ledger
            .reject_step_execution(claimed.id, "Unknown step: nope")
            .await
            .unwrap()
            .is_none());
        let stored = ledger.get_step_execution(claimed.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Started);
        assert!(stored.exit_message.is_none());
    }

    #[tokio::test]
    async fn test_mark_unknown_skips_terminal() {
        let (ledger, job, first) = ledger_with_step().await;
        let second = ledger
            .create_step_execution(NewStepExecution::for_partition(
                job.id,
                "slaveStep:partition1",
                PartitionBounds::new(101, 200),
            ))
            .await
            .unwrap();
        ledger.claim_step_execution(first.id).await.unwrap();
        ledger
            .record_step_outcome(first.id, &StepOutcome::completed(100, 100))
            .await
            .unwrap();

        let marked = ledger
            .mark_unknown(&[first.id, second.id, 77], "poll timeout")
            .await
            .unwrap();
        assert_eq!(marked, vec![second.id]);

        let steps = ledger.step_executions_for_job(job.id).await.unwrap();
        assert_eq!(steps[0].status, ExecutionStatus::Completed);
        assert_eq!(steps[1].status, ExecutionStatus::Unknown);
        assert_eq!(steps[1].exit_message.as_deref(), Some("poll timeout"));
    }

    #[tokio::test]
    async fn test_job_completion() {
        let (ledger, job, _) = ledger_with_step().await;
        let done = ledger
            .complete_job_execution(job.id, JobStatus::Completed, None)
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.end_time.is_some());
        assert_eq!(
            ledger.get_job_execution(job.id).await.unwrap().status,
            JobStatus::Completed
        );
    }
}
