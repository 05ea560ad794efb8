//! # Worker Pool
//!
//! A fixed number of consumer loops competing for the request queue. Each
//! loop pulls a message, runs it through the handler to completion, and only
//! then acknowledges it (ack-after-commit). Anything that prevents the ledger
//! update leaves the message to reappear after its visibility timeout.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::WorkerRequestHandler;
use crate::config::WorkerConfig;
use crate::messaging::{MessageTransport, QueuedMessage, WorkRequest};

#[derive(Debug, Default)]
pub struct WorkerPoolStats {
    pub messages_received: AtomicU64,
    pub messages_acked: AtomicU64,
    /// Unparseable bodies dropped from the queue
    pub messages_rejected: AtomicU64,
    /// Left for redelivery after a ledger failure or a crashed runner
    pub messages_abandoned: AtomicU64,
    pub replies_sent: AtomicU64,
    pub poll_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerPoolStatsSnapshot {
    pub messages_received: u64,
    pub messages_acked: u64,
    pub messages_rejected: u64,
    pub messages_abandoned: u64,
    pub replies_sent: u64,
    pub poll_errors: u64,
}

impl WorkerPoolStats {
    pub fn snapshot(&self) -> WorkerPoolStatsSnapshot {
        WorkerPoolStatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_acked: self.messages_acked.load(Ordering::Relaxed),
            messages_rejected: self.messages_rejected.load(Ordering::Relaxed),
            messages_abandoned: self.messages_abandoned.load(Ordering::Relaxed),
            replies_sent: self.replies_sent.load(Ordering::Relaxed),
            poll_errors: self.poll_errors.load(Ordering::Relaxed),
        }
    }
}

pub struct WorkerPool {
    transport: Arc<MessageTransport>,
    handler: Arc<WorkerRequestHandler>,
    config: WorkerConfig,
    is_running: Arc<AtomicBool>,
    stats: Arc<WorkerPoolStats>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("is_running", &self.is_running())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl WorkerPool {
    pub fn new(
        transport: Arc<MessageTransport>,
        handler: Arc<WorkerRequestHandler>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            transport,
            handler,
            config,
            is_running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(WorkerPoolStats::default()),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> WorkerPoolStatsSnapshot {
        self.stats.snapshot()
    }

    /// Spawn `concurrency` consumer loops; a no-op when already running
    pub fn start(&self) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            warn!("WorkerPool already running");
            return;
        }

        let concurrency = self.config.concurrency.max(1);
        info!(
            concurrency,
            queue = %self.transport.queues().request_queue,
            polling_interval = ?self.config.polling_interval(),
            "Starting WorkerPool"
        );

        let mut handles = self.handles.lock();
        for consumer_id in 0..concurrency {
            let consumer = Consumer {
                id: consumer_id,
                transport: Arc::clone(&self.transport),
                handler: Arc::clone(&self.handler),
                config: self.config.clone(),
                is_running: Arc::clone(&self.is_running),
                stats: Arc::clone(&self.stats),
            };
            handles.push(tokio::spawn(consumer.run()));
        }
    }

    /// Stop pulling new messages and wait for in-flight ones to finish
    pub async fn stop(&self) {
        if !self.is_running.swap(false, Ordering::SeqCst) {
            return;
        }
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        info!(consumers = handles.len(), "Stopping WorkerPool");

        for result in join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Worker consumer ended abnormally");
            }
        }
        info!(stats = ?self.stats.snapshot(), "WorkerPool stopped");
    }

    /// Run until `shutdown` resolves, then stop gracefully
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: std::future::Future<Output = ()>,
    {
        self.start();
        shutdown.await;
        self.stop().await;
    }
}

struct Consumer {
    id: u32,
    transport: Arc<MessageTransport>,
    handler: Arc<WorkerRequestHandler>,
    config: WorkerConfig,
    is_running: Arc<AtomicBool>,
    stats: Arc<WorkerPoolStats>,
}

impl Consumer {
    async fn run(self) {
        debug!(consumer_id = self.id, "Worker consumer started");
        let batch_size = self.config.batch_size.max(1) as usize;

        while self.is_running.load(Ordering::SeqCst) {
            let messages = match self.transport.receive_requests(batch_size).await {
                Ok(messages) => messages,
                Err(e) => {
                    self.stats.poll_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(consumer_id = self.id, error = %e, "Failed to read request queue");
                    tokio::time::sleep(self.config.polling_interval()).await;
                    continue;
                }
            };

            if messages.is_empty() {
                tokio::time::sleep(self.config.polling_interval()).await;
                continue;
            }

            for message in messages {
                self.stats.messages_received.fetch_add(1, Ordering::Relaxed);
                self.process(message).await;
            }
        }
        debug!(consumer_id = self.id, "Worker consumer stopped");
    }

    async fn process(&self, message: QueuedMessage<serde_json::Value>) {
        let QueuedMessage {
            receipt_handle,
            message: body,
            receive_count,
            ..
        } = message;

        let request = match serde_json::from_value::<WorkRequest>(body) {
            Ok(request) => request,
            Err(e) => {
                warn!(consumer_id = self.id, error = %e, "Rejecting malformed work request");
                self.stats.messages_rejected.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = self.transport.reject_request(&receipt_handle).await {
                    warn!(error = %e, "Failed to reject malformed work request");
                }
                return;
            }
        };
        let execution_id = request.execution_id;
        if receive_count > 1 {
            debug!(consumer_id = self.id, execution_id, receive_count, "Redelivered work request");
        }

        // A separate task so a panicking runner behaves like a crashed worker
        let handler = Arc::clone(&self.handler);
        let reply = match tokio::spawn(async move { handler.handle(request).await }).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                self.stats.messages_abandoned.fetch_add(1, Ordering::Relaxed);
                error!(
                    consumer_id = self.id,
                    execution_id,
                    error = %e,
                    "Ledger update failed; leaving request for redelivery"
                );
                return;
            }
            Err(e) => {
                self.stats.messages_abandoned.fetch_add(1, Ordering::Relaxed);
                error!(
                    consumer_id = self.id,
                    execution_id,
                    error = %e,
                    "Partition execution crashed; leaving request for redelivery"
                );
                return;
            }
        };

        match self.transport.ack_request(&receipt_handle).await {
            Ok(()) => {
                self.stats.messages_acked.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!(
                consumer_id = self.id,
                execution_id,
                error = %e,
                "Failed to ack work request; it will be redelivered and skipped"
            ),
        }

        match self.transport.publish_reply(&reply).await {
            Ok(Some(_)) => {
                self.stats.replies_sent.fetch_add(1, Ordering::Relaxed);
            }
            Ok(None) => {}
            Err(e) => warn!(execution_id, error = %e, "Failed to publish reply"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::ledger::{ExecutionLedger, InMemoryExecutionLedger};
    use crate::messaging::MessagingProvider;
    use crate::models::{NewStepExecution, PartitionBounds};
    use crate::runner::{PartitionRunner, RunSummary, RunnerError, StepRegistry};
    use crate::state_machine::ExecutionStatus;
    use async_trait::async_trait;
    use std::time::Duration;

    struct RowCountRunner;

    #[async_trait]
    impl PartitionRunner for RowCountRunner {
        async fn run(&self, _: i64, bounds: PartitionBounds) -> Result<RunSummary, RunnerError> {
            let rows = bounds.len() as i64;
            Ok(RunSummary::new(rows, rows))
        }
    }

    #[tokio::test]
    async fn test_pool_processes_and_acks() {
        let provider = Arc::new(MessagingProvider::new_in_memory());
        let transport = Arc::new(MessageTransport::new(provider.clone(), QueueConfig::default()));
        transport.bootstrap().await.unwrap();

        let ledger = Arc::new(InMemoryExecutionLedger::new());
        let job = ledger.create_job_execution("job").await.unwrap();
        let step = ledger
            .create_step_execution(NewStepExecution::for_partition(
                job.id,
                "slaveStep:partition0",
                PartitionBounds::new(1, 50),
            ))
            .await
            .unwrap();
        transport
            .publish_request(&WorkRequest::new("slaveStep", step.id, PartitionBounds::new(1, 50)))
            .await
            .unwrap();
        provider
            .send_message(&transport.queues().request_queue, &serde_json::json!({"bogus": true}))
            .await
            .unwrap();

        let registry = StepRegistry::builder()
            .register("slaveStep", Arc::new(RowCountRunner))
            .build();
        let handler = Arc::new(WorkerRequestHandler::new(ledger.clone(), registry));
        let config = WorkerConfig {
            concurrency: 2,
            polling_interval_ms: 10,
            ..WorkerConfig::default()
        };
        let pool = WorkerPool::new(transport.clone(), handler, config);
        pool.start();
        assert!(pool.is_running());

        for _ in 0..200 {
            if pool.stats().messages_acked == 1 && pool.stats().messages_rejected == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        pool.stop().await;
        assert!(!pool.is_running());

        let stats = pool.stats();
        assert_eq!(stats.messages_acked, 1);
        assert_eq!(stats.messages_rejected, 1);
        assert_eq!(stats.replies_sent, 1);

        let stored = ledger.get_step_execution(step.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
        assert_eq!(stored.write_count, 50);

        let memory = provider.as_in_memory().unwrap();
        assert_eq!(memory.queue_length(&transport.queues().request_queue).await, 0);
        assert_eq!(memory.queue_length(&transport.queues().reply_queue).await, 1);
    }
}
