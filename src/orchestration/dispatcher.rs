//! # Partition Dispatcher
//!
//! Master side of a partitioned job:
//!
//! 1. Create the job execution and one STARTING step execution per partition.
//! 2. Hand a work request per partition to the transport's dispatch channel.
//! 3. Poll the ledger every `poll_interval` until every step execution is
//!    terminal or `poll_timeout` elapses. A reply for one of this job's
//!    executions wakes the loop early; the ledger still decides.
//! 4. On the deadline, mark what is left UNKNOWN. Aggregate and finish the job.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::JobConfig;
use crate::constants::partition_execution_name;
use crate::error::{BatchError, BatchResult};
use crate::ledger::ExecutionLedger;
use crate::logging::log_job_operation;
use crate::messaging::{DispatchSummary, MessageTransport, ReplyListener, WorkRequest};
use crate::models::{JobExecution, JobResult, NewStepExecution, Partition, PartitionOutcome, StepExecution};
use crate::state_machine::JobStatus;

pub struct PartitionDispatcher {
    ledger: Arc<dyn ExecutionLedger>,
    transport: Arc<MessageTransport>,
    job: JobConfig,
}

impl std::fmt::Debug for PartitionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionDispatcher")
            .field("job", &self.job)
            .field("transport", &self.transport)
            .finish()
    }
}

/// Ledger state when polling stopped
struct PollOutcome {
    steps: Vec<StepExecution>,
    unresolved: Vec<i64>,
}

impl PartitionDispatcher {
    pub fn new(ledger: Arc<dyn ExecutionLedger>, transport: Arc<MessageTransport>, job: JobConfig) -> Self {
        Self {
            ledger,
            transport,
            job,
        }
    }

    pub fn job_config(&self) -> &JobConfig {
        &self.job
    }

    /// Run one job over `partitions`.
    ///
    /// Partition failures and the poll deadline produce a FAILED `JobResult`,
    /// not an `Err`. `Err` means the ledger could not be used at all.
    pub async fn execute(&self, partitions: &[Partition]) -> BatchResult<JobResult> {
        let job_execution = self.ledger.create_job_execution(&self.job.name).await?;
        log_job_operation(
            "start",
            job_execution.id,
            &job_execution.job_name,
            job_execution.status.as_str(),
            Some(&format!("{} partition(s)", partitions.len())),
        );

        match self.run(&job_execution, partitions).await {
            Ok(result) => Ok(result),
            Err(e) => {
                // Best effort: the job record should not stay STARTED forever
                if let Err(close_err) = self
                    .ledger
                    .complete_job_execution(job_execution.id, JobStatus::Failed, Some(e.to_string()))
                    .await
                {
                    warn!(
                        job_execution_id = job_execution.id,
                        error = %close_err,
                        "Failed to mark job execution FAILED"
                    );
                }
                log_job_operation(
                    "abort",
                    job_execution.id,
                    &job_execution.job_name,
                    JobStatus::Failed.as_str(),
                    Some(&e.to_string()),
                );
                Err(e)
            }
        }
    }

    async fn run(&self, job_execution: &JobExecution, partitions: &[Partition]) -> BatchResult<JobResult> {
        let mut requests = Vec::with_capacity(partitions.len());
        for partition in partitions {
            let step = self
                .ledger
                .create_step_execution(NewStepExecution::for_partition(
                    job_execution.id,
                    partition_execution_name(&self.job.step_name, partition.index),
                    partition.bounds,
                ))
                .await?;
            requests.push(WorkRequest::new(&self.job.step_name, step.id, partition.bounds));
        }
        let execution_ids: Vec<i64> = requests.iter().map(|r| r.execution_id).collect();

        let mut listener = self.transport.replies_enabled().then(|| {
            self.transport
                .spawn_reply_listener(execution_ids.iter().copied().collect::<HashSet<_>>(), &self.job)
        });

        let channel = self.transport.open_dispatch_channel(requests.len());
        let mut local_failures = Vec::new();
        for request in requests {
            let execution_id = request.execution_id;
            if let Err(e) = channel.dispatch(request).await {
                let error = BatchError::Dispatch {
                    execution_id,
                    reason: e.to_string(),
                };
                warn!(execution_id, error = %error, "Work request not dispatched");
                local_failures.push((execution_id, e.to_string()));
            }
        }
        let publisher = channel.close();

        let outcome = self.poll(&execution_ids, listener.as_mut()).await?;
        drop(listener);

        let mut dispatch_summary = if publisher.is_finished() {
            publisher.await.unwrap_or_else(|e| {
                warn!(error = %e, "Dispatch publisher task failed");
                DispatchSummary::default()
            })
        } else {
            publisher.abort();
            DispatchSummary::default()
        };
        dispatch_summary.failed.extend(local_failures);

        self.finish(job_execution, outcome, dispatch_summary).await
    }

    async fn poll(
        &self,
        execution_ids: &[i64],
        mut listener: Option<&mut ReplyListener>,
    ) -> BatchResult<PollOutcome> {
        let deadline = Instant::now() + self.job.poll_timeout();
        let poll_interval = self.job.poll_interval();

        loop {
            let steps = self.ledger.get_step_executions(execution_ids).await?;
            let pending: Vec<i64> = pending_ids(execution_ids, &steps);
            if pending.is_empty() {
                return Ok(PollOutcome {
                    steps,
                    unresolved: Vec::new(),
                });
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    pending = pending.len(),
                    timeout = ?self.job.poll_timeout(),
                    "Poll deadline reached"
                );
                let unresolved = self
                    .ledger
                    .mark_unknown(&pending, "Partition did not finish before the poll timeout")
                    .await?;
                let steps = self.ledger.get_step_executions(execution_ids).await?;
                return Ok(PollOutcome { steps, unresolved });
            }

            debug!(pending = pending.len(), "Waiting for partitions");
            let wait = poll_interval.min(deadline - now);
            let mut listener_closed = false;
            match listener.as_deref_mut() {
                Some(replies) => {
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        reply = replies.recv() => match reply {
                            Some(reply) => debug!(
                                execution_id = reply.execution_id,
                                status = %reply.status,
                                "Reply received; re-reading ledger"
                            ),
                            None => listener_closed = true,
                        },
                    }
                }
                None => tokio::time::sleep(wait).await,
            }
            if listener_closed {
                debug!("Reply listener closed; polling only");
                listener = None;
            }
        }
    }

    async fn finish(
        &self,
        job_execution: &JobExecution,
        outcome: PollOutcome,
        dispatch_summary: DispatchSummary,
    ) -> BatchResult<JobResult> {
        let PollOutcome { steps, unresolved } = outcome;
        let timed_out = !unresolved.is_empty();
        let status = JobStatus::aggregate(steps.iter().map(|s| &s.status));
        let partitions: Vec<PartitionOutcome> = steps.iter().map(PartitionOutcome::from).collect();

        let exit_message = if timed_out {
            Some(
                BatchError::Timeout {
                    job_execution_id: job_execution.id,
                    unresolved: unresolved.len(),
                }
                .to_string(),
            )
        } else if status == JobStatus::Failed {
            let failed: Vec<&str> = partitions
                .iter()
                .filter(|p| p.status.is_failure())
                .map(|p| p.name.as_str())
                .collect();
            Some(format!("Failed partitions: {}", failed.join(", ")))
        } else {
            None
        };

        let finished = self
            .ledger
            .complete_job_execution(job_execution.id, status, exit_message.clone())
            .await?;

        let result = JobResult {
            job_execution_id: job_execution.id,
            job_name: job_execution.job_name.clone(),
            status,
            partitions,
            timed_out,
            unresolved,
            dispatch_failures: dispatch_summary.failed,
            started_at: job_execution.start_time,
            finished_at: finished.end_time.unwrap_or_else(Utc::now),
        };

        log_job_operation(
            "finish",
            result.job_execution_id,
            &result.job_name,
            result.status.as_str(),
            exit_message.as_deref(),
        );
        info!(
            job_execution_id = result.job_execution_id,
            status = %result.status,
            rows_written = result.total_rows_written(),
            timed_out = result.timed_out,
            "Partitioned job finished"
        );
        Ok(result)
    }
}

/// Requested ids that are missing from the ledger or not yet terminal
fn pending_ids(execution_ids: &[i64], steps: &[StepExecution]) -> Vec<i64> {
    let terminal: HashSet<i64> = steps
        .iter()
        .filter(|s| s.is_terminal())
        .map(|s| s.id)
        .collect();
    execution_ids
        .iter()
        .copied()
        .filter(|id| !terminal.contains(id))
        .collect()
}
