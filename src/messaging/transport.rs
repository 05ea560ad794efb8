//! # Message Transport
//!
//! Request/reply bridge between the master and the workers.
//!
//! - Outbound: the dispatcher hands work requests to an in-process channel; a
//!   publisher task drains it into the request queue. Publishing never blocks
//!   the dispatcher's poll loop.
//! - Inbound (worker side): competing consumers read the request queue with a
//!   visibility timeout and ack only after their ledger update commits.
//! - Replies: workers publish best-effort replies; the master's reply listener
//!   forwards the ones it is waiting for. Replies only shorten the master's
//!   wait, they never decide completion.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::message::{Reply, WorkRequest};
use super::service::{MessageId, MessagingProvider, QueueHealthReport, QueuedMessage, ReceiptHandle};
use super::{MessagingError, MessagingResult};
use crate::config::{JobConfig, QueueConfig};
use crate::logging::log_queue_operation;

const REPLY_BATCH_SIZE: usize = 10;

#[derive(Debug)]
pub struct MessageTransport {
    provider: Arc<MessagingProvider>,
    queues: QueueConfig,
}

impl MessageTransport {
    pub fn new(provider: Arc<MessagingProvider>, queues: QueueConfig) -> Self {
        Self { provider, queues }
    }

    pub fn provider(&self) -> &Arc<MessagingProvider> {
        &self.provider
    }

    pub fn queues(&self) -> &QueueConfig {
        &self.queues
    }

    pub fn replies_enabled(&self) -> bool {
        self.queues.reply_enabled
    }

    /// Create the request and reply queues if needed, then verify them
    pub async fn bootstrap(&self) -> MessagingResult<QueueHealthReport> {
        let names = self.queues.all_queue_names();
        self.provider.ensure_queues(&names).await?;
        let report = self.provider.verify_queues(&names).await?;

        if report.is_healthy() {
            debug!(
                provider = self.provider.provider_name(),
                queues = ?report.healthy,
                "Transport queues ready"
            );
        } else {
            warn!(
                provider = self.provider.provider_name(),
                missing = ?report.missing,
                errors = ?report.errors,
                "Transport queues unhealthy after bootstrap"
            );
        }
        Ok(report)
    }

    /// Publish one request straight to the request queue
    pub async fn publish_request(&self, request: &WorkRequest) -> MessagingResult<MessageId> {
        let id = self
            .provider
            .send_message(&self.queues.request_queue, request)
            .await?;
        log_queue_operation("publish_request", &self.queues.request_queue, 1, "sent");
        Ok(id)
    }

    /// Start the outbound publisher task.
    ///
    /// Requests pushed into the returned channel are published in order. The
    /// task ends once every sender is dropped and reports what it published.
    pub fn open_dispatch_channel(self: &Arc<Self>, capacity: usize) -> DispatchChannel {
        let (sender, mut receiver) = mpsc::channel::<WorkRequest>(capacity.max(1));
        let transport = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let mut summary = DispatchSummary::default();
            while let Some(request) = receiver.recv().await {
                match transport.publish_request(&request).await {
                    Ok(message_id) => {
                        debug!(
                            execution_id = request.execution_id,
                            message_id = %message_id,
                            "Work request published"
                        );
                        summary.published.push(request.execution_id);
                    }
                    Err(e) => {
                        // The record stays STARTING; the poll deadline resolves it
                        error!(
                            execution_id = request.execution_id,
                            queue = %transport.queues.request_queue,
                            error = %e,
                            "Failed to publish work request"
                        );
                        summary.failed.push((request.execution_id, e.to_string()));
                    }
                }
            }
            summary
        });

        DispatchChannel { sender, handle }
    }

    /// Read work requests as raw JSON so one malformed body cannot poison a batch
    pub async fn receive_requests(
        &self,
        max_messages: usize,
    ) -> MessagingResult<Vec<QueuedMessage<serde_json::Value>>> {
        let messages = self
            .provider
            .receive_messages::<serde_json::Value>(
                &self.queues.request_queue,
                max_messages,
                self.queues.visibility_timeout(),
            )
            .await?;
        if !messages.is_empty() {
            log_queue_operation(
                "receive_requests",
                &self.queues.request_queue,
                messages.len(),
                "received",
            );
        }
        Ok(messages)
    }

    pub async fn ack_request(&self, receipt_handle: &ReceiptHandle) -> MessagingResult<()> {
        self.provider
            .ack_message(&self.queues.request_queue, receipt_handle)
            .await
    }

    /// Drop a request that can never be processed (unparseable body)
    pub async fn reject_request(&self, receipt_handle: &ReceiptHandle) -> MessagingResult<()> {
        self.provider
            .nack_message(&self.queues.request_queue, receipt_handle, false)
            .await
    }

    /// Publish a reply when the reply channel is enabled; `Ok(None)` otherwise
    pub async fn publish_reply(&self, reply: &Reply) -> MessagingResult<Option<MessageId>> {
        if !self.queues.reply_enabled {
            return Ok(None);
        }
        let id = self
            .provider
            .send_message(&self.queues.reply_queue, reply)
            .await?;
        log_queue_operation("publish_reply", &self.queues.reply_queue, 1, "sent");
        Ok(Some(id))
    }

    /// Start a task that forwards replies for `execution_ids` to the caller.
    ///
    /// Replies for other executions are stale (an earlier run, or another
    /// master) and are acked without forwarding. The task stops when the
    /// listener is dropped.
    pub fn spawn_reply_listener(
        self: &Arc<Self>,
        execution_ids: HashSet<i64>,
        job: &JobConfig,
    ) -> ReplyListener {
        let (sender, receiver) = mpsc::channel::<Reply>(execution_ids.len().max(1));
        let transport = Arc::clone(self);
        let poll_interval = job.reply_poll_interval();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            loop {
                interval.tick().await;
                if sender.is_closed() {
                    break;
                }
                match transport.drain_replies(&execution_ids, &sender).await {
                    Ok(()) => {}
                    Err(MessagingError::Closed { .. }) => break,
                    Err(e) => warn!(
                        queue = %transport.queues.reply_queue,
                        error = %e,
                        "Reply poll failed"
                    ),
                }
            }
        });

        ReplyListener { receiver, handle }
    }

    async fn drain_replies(
        &self,
        execution_ids: &HashSet<i64>,
        sender: &mpsc::Sender<Reply>,
    ) -> MessagingResult<()> {
        let queue = &self.queues.reply_queue;
        let messages = self
            .provider
            .receive_messages::<serde_json::Value>(
                queue,
                REPLY_BATCH_SIZE,
                self.queues.visibility_timeout(),
            )
            .await?;

        for message in messages {
            let QueuedMessage {
                receipt_handle,
                message: body,
                ..
            } = message;

            match serde_json::from_value::<Reply>(body) {
                Ok(reply) => {
                    self.provider.ack_message(queue, &receipt_handle).await?;
                    if execution_ids.contains(&reply.execution_id) {
                        sender
                            .send(reply)
                            .await
                            .map_err(|_| MessagingError::closed("reply listener dropped"))?;
                    } else {
                        debug!(
                            execution_id = reply.execution_id,
                            "Discarding reply for an execution this job does not own"
                        );
                    }
                }
                Err(e) => {
                    warn!(queue = %queue, error = %e, "Discarding malformed reply");
                    self.provider
                        .nack_message(queue, &receipt_handle, false)
                        .await?;
                }
            }
        }
        Ok(())
    }
}

/// What the outbound publisher task managed to send
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub published: Vec<i64>,
    pub failed: Vec<(i64, String)>,
}

/// Producer side of the outbound dispatch path
#[derive(Debug)]
pub struct DispatchChannel {
    sender: mpsc::Sender<WorkRequest>,
    handle: JoinHandle<DispatchSummary>,
}

impl DispatchChannel {
    /// Queue a request for publishing
    pub async fn dispatch(&self, request: WorkRequest) -> MessagingResult<()> {
        self.sender
            .send(request)
            .await
            .map_err(|e| MessagingError::closed(format!("dispatch channel closed: {e}")))
    }

    /// Close the channel; the returned handle resolves once the backlog is published
    pub fn close(self) -> JoinHandle<DispatchSummary> {
        drop(self.sender);
        self.handle
    }
}

/// Receiving end of a reply listener; dropping it stops the listener task
#[derive(Debug)]
pub struct ReplyListener {
    receiver: mpsc::Receiver<Reply>,
    handle: JoinHandle<()>,
}

impl ReplyListener {
    pub async fn recv(&mut self) -> Option<Reply> {
        self.receiver.recv().await
    }
}

impl Drop for ReplyListener {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::InMemoryMessagingService;
    use crate::models::PartitionBounds;
    use crate::state_machine::ExecutionStatus;
    use std::time::Duration;

    async fn transport(reply_enabled: bool) -> Arc<MessageTransport> {
        let queues = QueueConfig {
            reply_enabled,
            ..QueueConfig::default()
        };
        let provider = Arc::new(MessagingProvider::from(InMemoryMessagingService::new()));
        let transport = Arc::new(MessageTransport::new(provider, queues));
        transport.bootstrap().await.unwrap();
        transport
    }

    #[tokio::test]
    async fn test_dispatch_channel_publishes_in_order() {
        let transport = transport(true).await;
        let channel = transport.open_dispatch_channel(4);
        for id in 1..=3 {
            channel
                .dispatch(WorkRequest::new("slaveStep", id, PartitionBounds::new(id, id)))
                .await
                .unwrap();
        }
        let summary = channel.close().await.unwrap();
        assert_eq!(summary.published, vec![1, 2, 3]);
        assert!(summary.failed.is_empty());

        let received = transport.receive_requests(10).await.unwrap();
        let ids: Vec<i64> = received
            .iter()
            .map(|m| m.message["executionId"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_reported_not_raised() {
        let provider = Arc::new(MessagingProvider::from(InMemoryMessagingService::new()));
        // No bootstrap: the request queue does not exist
        let transport = Arc::new(MessageTransport::new(provider, QueueConfig::default()));
        let channel = transport.open_dispatch_channel(1);
        channel
            .dispatch(WorkRequest::new("slaveStep", 9, PartitionBounds::new(1, 2)))
            .await
            .unwrap();
        let summary = channel.close().await.unwrap();
        assert!(summary.published.is_empty());
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, 9);
    }

    #[tokio::test]
    async fn test_reply_disabled_is_noop() {
        let transport = transport(false).await;
        let sent = transport
            .publish_reply(&Reply::new(1, ExecutionStatus::Completed, None))
            .await
            .unwrap();
        assert!(sent.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_listener_forwards_only_owned_replies() {
        let transport = transport(true).await;
        let mut listener =
            transport.spawn_reply_listener([5_i64].into_iter().collect(), &JobConfig::default());

        transport
            .publish_reply(&Reply::new(99, ExecutionStatus::Completed, None))
            .await
            .unwrap();
        transport
            .publish_reply(&Reply::new(5, ExecutionStatus::Completed, None))
            .await
            .unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(5), listener.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.execution_id, 5);

        let in_memory = transport.provider().as_in_memory().unwrap();
        assert_eq!(in_memory.queue_length("partition_replies").await, 0);
    }
}
