//! End-to-end runs of a partitioned job: discovery, dispatch, worker pool
//! and ledger polling, all in-process.

mod common;

use std::time::Duration;

use common::{job_config, CopyRunner, CustomerKeyRange, CustomerTables, Harness};
use partition_batch::error::BatchError;
use partition_batch::ExecutionLedger;
use partition_batch::models::PartitionBounds;
use partition_batch::orchestration::PartitionedJob;
use partition_batch::state_machine::{ExecutionStatus, JobStatus};

#[tokio::test(start_paused = true)]
async fn test_four_partitions_migrate_all_rows() {
    let harness = Harness::with_replies(true).await;
    let tables = CustomerTables::with_ids(1..=4000);
    let runner = CopyRunner::new(tables.clone());
    let pool = harness.worker_pool(runner.clone(), 4);
    pool.start();

    let job = PartitionedJob::new(
        CustomerKeyRange(tables.clone()),
        harness.dispatcher(job_config(4)),
    );
    let started = tokio::time::Instant::now();
    let result = job.run().await.unwrap();
    let elapsed = started.elapsed();
    pool.stop().await;

    assert_eq!(result.status, JobStatus::Completed);
    assert!(!result.timed_out);
    assert_eq!(result.total_rows_written(), 4000);
    assert_eq!(tables.written(), 4000);
    assert_eq!(runner.invocations(), 4);
    // Workers finish almost immediately; the job must not wait a full extra cycle
    assert!(elapsed <= Duration::from_secs(2), "took {elapsed:?}");

    let steps = harness
        .ledger
        .step_executions_for_job(result.job_execution_id)
        .await
        .unwrap();
    let bounds: Vec<PartitionBounds> = steps.iter().filter_map(|s| s.bounds()).collect();
    assert_eq!(
        bounds,
        vec![
            PartitionBounds::new(1, 1000),
            PartitionBounds::new(1001, 2000),
            PartitionBounds::new(2001, 3000),
            PartitionBounds::new(3001, 4000),
        ]
    );
    assert!(steps.iter().all(|s| s.status == ExecutionStatus::Completed));
    assert!(steps.iter().all(|s| s.write_count == 1000));
    assert_eq!(
        steps.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
        vec![
            "slaveStep:partition0",
            "slaveStep:partition1",
            "slaveStep:partition2",
            "slaveStep:partition3"
        ]
    );

    let job_execution = harness
        .ledger
        .get_job_execution(result.job_execution_id)
        .await
        .unwrap();
    assert_eq!(job_execution.status, JobStatus::Completed);
    assert!(job_execution.end_time.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_write_fault_fails_only_its_partition() {
    let harness = Harness::with_replies(true).await;
    let tables = CustomerTables::with_ids(1..=4000);
    let pool = harness.worker_pool(CopyRunner::with_fault(tables.clone(), Some(2500)), 4);
    pool.start();

    let job = PartitionedJob::new(
        CustomerKeyRange(tables.clone()),
        harness.dispatcher(job_config(4)),
    );
    let result = job.run().await.unwrap();
    pool.stop().await;

    assert_eq!(result.status, JobStatus::Failed);
    assert!(!result.timed_out);

    let failed: Vec<_> = result.failed_partitions().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].name, "slaveStep:partition2");
    assert_eq!(failed[0].status, ExecutionStatus::Failed);
    assert!(failed[0].exit_message.as_deref().unwrap().contains("id=2500"));

    let completed = result
        .partitions
        .iter()
        .filter(|p| p.status == ExecutionStatus::Completed)
        .count();
    assert_eq!(completed, 3);

    assert!(matches!(
        result.into_result(),
        Err(BatchError::JobFailed { status, .. }) if status == "FAILED"
    ));
}

#[tokio::test(start_paused = true)]
async fn test_empty_table_completes_with_zero_rows() {
    let harness = Harness::with_replies(true).await;
    let tables = CustomerTables::with_ids(std::iter::empty());
    let runner = CopyRunner::new(tables.clone());
    let pool = harness.worker_pool(runner.clone(), 2);
    pool.start();

    let job = PartitionedJob::new(
        CustomerKeyRange(tables.clone()),
        harness.dispatcher(job_config(4)),
    );
    let result = job.run().await.unwrap();
    pool.stop().await;

    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(result.partitions.len(), 4);
    assert!(result
        .partitions
        .iter()
        .all(|p| p.status == ExecutionStatus::Completed && p.write_count == 0));
    assert_eq!(result.total_rows_written(), 0);
    assert_eq!(tables.written(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_job_completes_by_polling_when_replies_are_lost() {
    let harness = Harness::with_replies(false).await;
    let tables = CustomerTables::with_ids(1..=1000);
    let pool = harness.worker_pool(CopyRunner::new(tables.clone()), 2);
    pool.start();

    let job = PartitionedJob::new(
        CustomerKeyRange(tables.clone()),
        harness.dispatcher(job_config(3)),
    );
    let result = job.run().await.unwrap();
    pool.stop().await;

    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(result.total_rows_written(), 1000);
    assert_eq!(pool.stats().replies_sent, 0);
    assert_eq!(
        harness
            .memory()
            .total_sent(&harness.transport.queues().reply_queue)
            .await,
        0
    );
}

#[tokio::test(start_paused = true)]
async fn test_more_workers_than_partitions() {
    let harness = Harness::with_replies(true).await;
    let tables = CustomerTables::with_ids(1..=10);
    let runner = CopyRunner::new(tables.clone());
    let pool = harness.worker_pool(runner.clone(), 8);
    pool.start();

    let job = PartitionedJob::new(
        CustomerKeyRange(tables.clone()),
        harness.dispatcher(job_config(2)),
    );
    let result = job.run().await.unwrap();
    pool.stop().await;

    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(runner.invocations(), 2);
    assert_eq!(tables.written(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_no_workers_times_out_as_unknown() {
    let harness = Harness::with_replies(true).await;
    let tables = CustomerTables::with_ids(1..=100);

    let mut job = job_config(2);
    job.poll_timeout_ms = 5_000;
    let job = PartitionedJob::new(CustomerKeyRange(tables), harness.dispatcher(job));
    let result = job.run().await.unwrap();

    assert_eq!(result.status, JobStatus::Failed);
    assert!(result.timed_out);
    assert_eq!(result.unresolved.len(), 2);
    assert!(result
        .partitions
        .iter()
        .all(|p| p.status == ExecutionStatus::Unknown));
}
