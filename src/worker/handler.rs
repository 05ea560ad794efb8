//! # Worker Request Handler
//!
//! Executes one work request against the ledger:
//!
//! 1. Skip execution when the record is already terminal, replying with the
//!    stored status. Redelivered requests end here.
//! 2. Resolve the step name to a registered runner. `UnknownStep` fails only
//!    this partition, and only while its record is still STARTING.
//! 3. Claim the record (STARTING -> STARTED). Losing the claim also skips.
//! 4. Run the partition and write the terminal outcome.
//!
//! `handle` returns `Err` only when the ledger itself fails. The caller must
//! then leave the message unacknowledged so the broker redelivers it.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{BatchError, BatchResult};
use crate::ledger::{ClaimOutcome, ExecutionLedger};
use crate::logging::log_partition_operation;
use crate::messaging::{Reply, WorkRequest};
use crate::models::{StepExecution, StepOutcome};
use crate::runner::{PartitionRunner, RunnerError, StepRegistry};

pub struct WorkerRequestHandler {
    ledger: Arc<dyn ExecutionLedger>,
    registry: StepRegistry,
}

impl std::fmt::Debug for WorkerRequestHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRequestHandler")
            .field("registry", &self.registry)
            .finish()
    }
}

impl WorkerRequestHandler {
    pub fn new(ledger: Arc<dyn ExecutionLedger>, registry: StepRegistry) -> Self {
        Self { ledger, registry }
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    pub async fn handle(&self, request: WorkRequest) -> BatchResult<Reply> {
        let execution_id = request.execution_id;

        let Some(current) = self.ledger.get_step_execution(execution_id).await? else {
            warn!(execution_id, step_name = %request.step_name, "No execution record for request");
            return Ok(Reply::failed(
                execution_id,
                BatchError::ExecutionNotFound(execution_id).to_string(),
            ));
        };
        if current.is_terminal() {
            log_partition_operation(
                "skip",
                execution_id,
                &request.step_name,
                current.status.as_str(),
                Some("already terminal"),
            );
            return Ok(reply_from_record(&current));
        }

        let runner = match self.registry.resolve(&request.step_name) {
            Ok(runner) => runner,
            Err(e @ BatchError::UnknownStep(_)) => {
                return self.reject(&request, e.to_string()).await;
            }
            Err(e) => return Err(e),
        };

        match self.ledger.claim_step_execution(execution_id).await? {
            ClaimOutcome::Claimed(_) => {}
            ClaimOutcome::NotClaimable(current) => {
                log_partition_operation(
                    "skip",
                    execution_id,
                    &request.step_name,
                    current.status.as_str(),
                    Some("claimed elsewhere"),
                );
                return Ok(reply_from_record(&current));
            }
        }
        log_partition_operation("claim", execution_id, &request.step_name, "STARTED", None);

        let outcome = run_partition(runner.as_ref(), &request).await;
        self.record(&request, outcome).await
    }

    /// Fail a request this worker cannot run, unless another worker has
    /// already claimed its record
    async fn reject(&self, request: &WorkRequest, info: String) -> BatchResult<Reply> {
        let execution_id = request.execution_id;
        warn!(execution_id, step_name = %request.step_name, reason = %info, "Rejecting work request");

        if let Some(rejected) = self.ledger.reject_step_execution(execution_id, &info).await? {
            log_partition_operation(
                "reject",
                execution_id,
                &request.step_name,
                rejected.status.as_str(),
                Some(&info),
            );
            return Ok(reply_from_record(&rejected));
        }

        match self.ledger.get_step_execution(execution_id).await? {
            Some(stored) => {
                debug!(
                    execution_id,
                    stored = %stored.status,
                    "Record no longer STARTING; leaving it to its owner"
                );
                Ok(reply_from_record(&stored))
            }
            None => Ok(Reply::failed(execution_id, info)),
        }
    }

    async fn record(&self, request: &WorkRequest, outcome: StepOutcome) -> BatchResult<Reply> {
        let execution_id = request.execution_id;

        match self.ledger.record_step_outcome(execution_id, &outcome).await? {
            Some(updated) => {
                log_partition_operation(
                    "finish",
                    execution_id,
                    &request.step_name,
                    updated.status.as_str(),
                    updated.exit_message.as_deref(),
                );
                Ok(reply_from_record(&updated))
            }
            None => {
                // Someone else wrote a terminal status first (the dispatcher's deadline)
                let stored = self
                    .ledger
                    .get_step_execution(execution_id)
                    .await?
                    .ok_or(BatchError::ExecutionNotFound(execution_id))?;
                debug!(
                    execution_id,
                    attempted = %outcome.status,
                    stored = %stored.status,
                    "Outcome not applied"
                );
                Ok(reply_from_record(&stored))
            }
        }
    }
}

async fn run_partition(runner: &dyn PartitionRunner, request: &WorkRequest) -> StepOutcome {
    let bounds = request.bounds();
    match runner.run(request.execution_id, bounds).await {
        Ok(summary) => StepOutcome::completed(summary.read_count, summary.write_count),
        Err(RunnerError::Stopped {
            reason,
            read_count,
            write_count,
        }) => StepOutcome::stopped(read_count, write_count, reason),
        Err(e) => {
            let error = BatchError::Processing {
                execution_id: request.execution_id,
                message: e.to_string(),
            };
            StepOutcome::failed(error.to_string())
        }
    }
}

fn reply_from_record(record: &StepExecution) -> Reply {
    let failure_info = if record.status.is_failure() {
        record.exit_message.clone()
    } else {
        None
    };
    Reply::new(record.id, record.status, failure_info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryExecutionLedger;
    use crate::models::{NewStepExecution, PartitionBounds};
    use crate::runner::RunSummary;
    use crate::state_machine::ExecutionStatus;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedRunner {
        calls: AtomicUsize,
        result: Result<RunSummary, RunnerError>,
    }

    impl ScriptedRunner {
        fn new(result: Result<RunSummary, RunnerError>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                result,
            })
        }
    }

    #[async_trait]
    impl PartitionRunner for ScriptedRunner {
        async fn run(&self, _: i64, _: PartitionBounds) -> Result<RunSummary, RunnerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    async fn setup(
        runner: Arc<ScriptedRunner>,
    ) -> (WorkerRequestHandler, Arc<InMemoryExecutionLedger>, WorkRequest) {
        let ledger = Arc::new(InMemoryExecutionLedger::new());
        let job = ledger.create_job_execution("job").await.unwrap();
        let bounds = PartitionBounds::new(1, 1000);
        let step = ledger
            .create_step_execution(NewStepExecution::for_partition(
                job.id,
                "slaveStep:partition0",
                bounds,
            ))
            .await
            .unwrap();
        let registry = StepRegistry::builder().register("slaveStep", runner).build();
        let handler = WorkerRequestHandler::new(ledger.clone(), registry);
        (handler, ledger, WorkRequest::new("slaveStep", step.id, bounds))
    }

    #[tokio::test]
    async fn test_completes_partition() {
        let runner = ScriptedRunner::new(Ok(RunSummary::new(1000, 1000)));
        let (handler, ledger, request) = setup(runner.clone()).await;

        let reply = handler.handle(request.clone()).await.unwrap();
        assert_eq!(reply.status, ExecutionStatus::Completed);
        assert!(reply.failure_info.is_none());

        let stored = ledger.get_step_execution(request.execution_id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
        assert_eq!(stored.write_count, 1000);
    }

    #[tokio::test]
    async fn test_redelivery_does_not_rerun() {
        let runner = ScriptedRunner::new(Ok(RunSummary::new(10, 10)));
        let (handler, _, request) = setup(runner.clone()).await;

        handler.handle(request.clone()).await.unwrap();
        let reply = handler.handle(request).await.unwrap();

        assert_eq!(reply.status, ExecutionStatus::Completed);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_processing_error_fails_partition() {
        let runner = ScriptedRunner::new(Err(RunnerError::processing("duplicate key at id 2500")));
        let (handler, ledger, request) = setup(runner).await;

        let reply = handler.handle(request.clone()).await.unwrap();
        assert_eq!(reply.status, ExecutionStatus::Failed);
        assert!(reply.failure_info.unwrap().contains("duplicate key at id 2500"));

        let stored = ledger.get_step_execution(request.execution_id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn test_stopped_runner() {
        let runner = ScriptedRunner::new(Err(RunnerError::stopped("shutdown", RunSummary::new(5, 5))));
        let (handler, ledger, request) = setup(runner).await;

        let reply = handler.handle(request.clone()).await.unwrap();
        assert_eq!(reply.status, ExecutionStatus::Stopped);
        assert!(reply.failure_info.is_none());
        let stored = ledger.get_step_execution(request.execution_id).await.unwrap().unwrap();
        assert_eq!(stored.read_count, 5);
    }

    #[tokio::test]
    async fn test_unknown_step_fails_only_that_record() {
        let runner = ScriptedRunner::new(Ok(RunSummary::default()));
        let (handler, ledger, mut request) = setup(runner.clone()).await;
        request.step_name = "missingStep".to_string();

        let reply = handler.handle(request.clone()).await.unwrap();
        assert_eq!(reply.status, ExecutionStatus::Failed);
        assert_eq!(reply.failure_info.as_deref(), Some("Unknown step: missingStep"));
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);

        let stored = ledger.get_step_execution(request.execution_id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn test_unknown_step_leaves_claimed_record_to_owner() {
        let runner = ScriptedRunner::new(Ok(RunSummary::default()));
        let (_, ledger, request) = setup(runner).await;
        // Another worker holds the claim and is mid-run
        ledger.claim_step_execution(request.execution_id).await.unwrap();

        let unregistered = WorkerRequestHandler::new(ledger.clone(), StepRegistry::builder().build());
        let reply = unregistered.handle(request.clone()).await.unwrap();
        assert_eq!(reply.status, ExecutionStatus::Started);
        assert!(reply.failure_info.is_none());

        let stored = ledger.get_step_execution(request.execution_id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Started);

        // The owner's outcome still lands
        let done = ledger
            .record_step_outcome(request.execution_id, &StepOutcome::completed(1000, 1000))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn test_unknown_step_on_finished_record_replies_stored_status() {
        let runner = ScriptedRunner::new(Ok(RunSummary::new(1000, 1000)));
        let (handler, ledger, request) = setup(runner).await;
        handler.handle(request.clone()).await.unwrap();

        let unregistered = WorkerRequestHandler::new(ledger.clone(), StepRegistry::builder().build());
        let reply = unregistered.handle(request.clone()).await.unwrap();
        assert_eq!(reply.status, ExecutionStatus::Completed);
        let stored = ledger.get_step_execution(request.execution_id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn test_missing_record_replies_failed() {
        let runner = ScriptedRunner::new(Ok(RunSummary::default()));
        let (handler, _, _) = setup(runner.clone()).await;

        let reply = handler
            .handle(WorkRequest::new("slaveStep", 404, PartitionBounds::new(1, 2)))
            .await
            .unwrap();
        assert_eq!(reply.status, ExecutionStatus::Failed);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_started_record_is_not_rerun() {
        let runner = ScriptedRunner::new(Ok(RunSummary::default()));
        let (handler, ledger, request) = setup(runner.clone()).await;
        ledger.claim_step_execution(request.execution_id).await.unwrap();

        let reply = handler.handle(request).await.unwrap();
        assert_eq!(reply.status, ExecutionStatus::Started);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_late_outcome_after_unknown() {
        let runner = ScriptedRunner::new(Ok(RunSummary::new(1, 1)));
        let (handler, ledger, request) = setup(runner).await;
        ledger.claim_step_execution(request.execution_id).await.unwrap();
        ledger.mark_unknown(&[request.execution_id], "timeout").await.unwrap();

        let reply = handler
            .record(&request, StepOutcome::completed(1, 1))
            .await
            .unwrap();
        assert_eq!(reply.status, ExecutionStatus::Unknown);
    }
}
