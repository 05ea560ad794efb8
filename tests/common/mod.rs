//! Shared harness for integration tests: in-memory ledger, in-memory broker
//! and a table-copying runner that behaves like the customer migration.
#![allow(dead_code)]

pub mod strategies;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use partition_batch::config::{JobConfig, QueueConfig, WorkerConfig};
use partition_batch::discovery::KeyRangeSource;
use partition_batch::error::BatchResult;
use partition_batch::ledger::InMemoryExecutionLedger;
use partition_batch::messaging::{InMemoryMessagingService, MessageTransport, MessagingProvider};
use partition_batch::models::PartitionBounds;
use partition_batch::orchestration::PartitionDispatcher;
use partition_batch::runner::{PartitionRunner, RunSummary, RunnerError, StepRegistry};
use partition_batch::worker::{WorkerPool, WorkerRequestHandler};

pub const STEP_NAME: &str = "slaveStep";

pub struct Harness {
    pub ledger: Arc<InMemoryExecutionLedger>,
    pub provider: Arc<MessagingProvider>,
    pub transport: Arc<MessageTransport>,
}

impl Harness {
    pub async fn new(queues: QueueConfig) -> Self {
        let provider = Arc::new(MessagingProvider::new_in_memory());
        let transport = Arc::new(MessageTransport::new(provider.clone(), queues));
        transport.bootstrap().await.expect("bootstrap in-memory queues");
        Self {
            ledger: Arc::new(InMemoryExecutionLedger::new()),
            provider,
            transport,
        }
    }

    pub async fn with_replies(reply_enabled: bool) -> Self {
        Self::new(QueueConfig {
            reply_enabled,
            ..QueueConfig::default()
        })
        .await
    }

    pub fn dispatcher(&self, job: JobConfig) -> PartitionDispatcher {
        PartitionDispatcher::new(self.ledger.clone(), self.transport.clone(), job)
    }

    pub fn worker_pool(&self, runner: Arc<dyn PartitionRunner>, concurrency: u32) -> WorkerPool {
        let registry = StepRegistry::builder().register(STEP_NAME, runner).build();
        let handler = Arc::new(WorkerRequestHandler::new(self.ledger.clone(), registry));
        WorkerPool::new(
            self.transport.clone(),
            handler,
            WorkerConfig {
                concurrency,
                polling_interval_ms: 50,
                batch_size: 1,
            },
        )
    }

    pub fn memory(&self) -> &InMemoryMessagingService {
        self.provider
            .as_in_memory()
            .expect("harness always uses the in-memory provider")
    }
}

/// One-second polling, sixty-second deadline
pub fn job_config(grid_size: u32) -> JobConfig {
    JobConfig {
        grid_size,
        poll_interval_ms: 1_000,
        poll_timeout_ms: 60_000,
        ..JobConfig::default()
    }
}

/// Source and destination "tables" keyed by id
#[derive(Debug, Default)]
pub struct CustomerTables {
    pub source: BTreeMap<i64, String>,
    pub destination: Mutex<BTreeMap<i64, String>>,
}

impl CustomerTables {
    pub fn with_ids(ids: impl IntoIterator<Item = i64>) -> Arc<Self> {
        Arc::new(Self {
            source: ids.into_iter().map(|id| (id, format!("customer-{id}"))).collect(),
            destination: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn written(&self) -> usize {
        self.destination.lock().len()
    }
}

/// Key range over the source table
pub struct CustomerKeyRange(pub Arc<CustomerTables>);

#[async_trait]
impl KeyRangeSource for CustomerKeyRange {
    async fn key_range(&self) -> BatchResult<Option<(i64, i64)>> {
        let first = self.0.source.keys().next().copied();
        let last = self.0.source.keys().next_back().copied();
        Ok(first.zip(last))
    }

    fn describe(&self) -> String {
        "customer.id".to_string()
    }
}

/// Copies rows in pages and chunks; optionally faults on one id like a
/// constraint violation would
pub struct CopyRunner {
    tables: Arc<CustomerTables>,
    page_size: usize,
    chunk_size: usize,
    fault_at: Option<i64>,
    pub invocations: AtomicUsize,
}

impl CopyRunner {
    pub fn new(tables: Arc<CustomerTables>) -> Arc<Self> {
        Self::with_fault(tables, None)
    }

    pub fn with_fault(tables: Arc<CustomerTables>, fault_at: Option<i64>) -> Arc<Self> {
        Arc::new(Self {
            tables,
            page_size: 250,
            chunk_size: 100,
            fault_at,
            invocations: AtomicUsize::new(0),
        })
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PartitionRunner for CopyRunner {
    async fn run(&self, _: i64, bounds: PartitionBounds) -> Result<RunSummary, RunnerError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if bounds.is_empty() {
            return Ok(RunSummary::default());
        }

        let mut summary = RunSummary::default();
        let mut pending = Vec::new();
        let mut from = bounds.lower;
        loop {
            let page: Vec<(i64, String)> = self
                .tables
                .source
                .range(from..=bounds.upper)
                .take(self.page_size)
                .map(|(id, name)| (*id, name.clone()))
                .collect();
            let Some((last, _)) = page.last().cloned() else {
                break;
            };
            summary.read_count += page.len() as i64;
            let full_page = page.len() == self.page_size;

            for row in page {
                if Some(row.0) == self.fault_at {
                    return Err(RunnerError::processing(format!(
                        "duplicate key value violates unique constraint \"new_customer_pkey\" (id={})",
                        row.0
                    )));
                }
                pending.push(row);
                if pending.len() == self.chunk_size {
                    summary.write_count += self.flush(&mut pending);
                }
            }
            // Yield between pages like a real database round trip
            tokio::task::yield_now().await;

            match last.checked_add(1) {
                Some(next) if full_page && next <= bounds.upper => from = next,
                _ => break,
            }
        }
        summary.write_count += self.flush(&mut pending);
        Ok(summary)
    }
}

impl CopyRunner {
    fn flush(&self, pending: &mut Vec<(i64, String)>) -> i64 {
        let written = pending.len() as i64;
        self.tables.destination.lock().extend(pending.drain(..));
        written
    }
}

/// Simulates a worker dying mid-partition
pub struct CrashingRunner;

#[async_trait]
impl PartitionRunner for CrashingRunner {
    async fn run(&self, execution_id: i64, _: PartitionBounds) -> Result<RunSummary, RunnerError> {
        panic!("worker process died while running execution {execution_id}");
    }
}
