//! # In-Memory Messaging Service
//!
//! Thread-safe in-memory queues for tests and single-process runs.
//!
//! Visibility is tracked with `tokio::time::Instant`, so tests running with
//! paused time can fast-forward through a visibility timeout and observe the
//! redelivery.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::messaging::service::traits::{MessagingService, QueueMessage};
use crate::messaging::service::types::{
    MessageId, QueueHealthReport, QueueStats, QueuedMessage, ReceiptHandle,
};
use crate::messaging::MessagingError;

#[derive(Debug, Clone)]
struct InMemoryQueuedMessage {
    id: i64,
    body: serde_json::Value,
    enqueued_at: DateTime<Utc>,
    /// When the message becomes visible again (None = visible now)
    visible_at: Option<Instant>,
    receive_count: u32,
}

#[derive(Debug, Default)]
struct InMemoryQueue {
    messages: VecDeque<InMemoryQueuedMessage>,
    last_id: i64,
    total_sent: u64,
}

impl InMemoryQueue {
    fn position(&self, receipt_handle: &ReceiptHandle) -> Result<usize, MessagingError> {
        let message_id = receipt_handle.message_id();
        self.messages
            .iter()
            .position(|m| m.id == message_id)
            .ok_or_else(|| MessagingError::message_not_found(message_id.to_string()))
    }
}

/// In-memory messaging service
///
/// ```rust
/// use partition_batch::messaging::{InMemoryMessagingService, MessagingService};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let service = InMemoryMessagingService::new();
/// service.ensure_queue("partition_requests").await?;
/// service
///     .send_message("partition_requests", &serde_json::json!({"executionId": 1}))
///     .await?;
/// let messages = service
///     .receive_messages::<serde_json::Value>("partition_requests", 10, Duration::from_secs(30))
///     .await?;
/// assert_eq!(messages.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct InMemoryMessagingService {
    queues: RwLock<HashMap<String, InMemoryQueue>>,
}

impl Default for InMemoryMessagingService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessagingService {
    pub fn new() -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_queues(queue_names: &[&str]) -> Self {
        let queues = queue_names
            .iter()
            .map(|name| (name.to_string(), InMemoryQueue::default()))
            .collect();
        Self {
            queues: RwLock::new(queues),
        }
    }

    /// Messages currently held by a queue, visible or in flight (for testing)
    pub async fn queue_length(&self, queue_name: &str) -> usize {
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map(|q| q.messages.len())
            .unwrap_or(0)
    }

    /// Messages ever sent to a queue (for testing)
    pub async fn total_sent(&self, queue_name: &str) -> u64 {
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map(|q| q.total_sent)
            .unwrap_or(0)
    }

    /// Drop every message in a queue (for testing)
    pub async fn clear_queue(&self, queue_name: &str) {
        let mut queues = self.queues.write().await;
        if let Some(queue) = queues.get_mut(queue_name) {
            queue.messages.clear();
        }
    }
}

#[async_trait]
impl MessagingService for InMemoryMessagingService {
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        let mut queues = self.queues.write().await;
        queues
            .entry(queue_name.to_string())
            .or_default();
        Ok(())
    }

    async fn verify_queues(
        &self,
        queue_names: &[String],
    ) -> Result<QueueHealthReport, MessagingError> {
        let queues = self.queues.read().await;
        let (healthy, missing): (Vec<String>, Vec<String>) = queue_names
            .iter()
            .cloned()
            .partition(|name| queues.contains_key(name));

        Ok(QueueHealthReport {
            healthy,
            missing,
            errors: Vec::new(),
        })
    }

    async fn send_message<T: QueueMessage>(
        &self,
        queue_name: &str,
        message: &T,
    ) -> Result<MessageId, MessagingError> {
        let body = message.to_json()?;

        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        queue.last_id += 1;
        queue.total_sent += 1;
        let id = queue.last_id;
        queue.messages.push_back(InMemoryQueuedMessage {
            id,
            body,
            enqueued_at: Utc::now(),
            visible_at: None,
            receive_count: 0,
        });

        Ok(MessageId(id))
    }

    async fn receive_messages<T: QueueMessage>(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<T>>, MessagingError> {
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let now = Instant::now();
        let visible_until = now + visibility_timeout;
        let mut received = Vec::new();

        for msg in queue.messages.iter_mut() {
            if received.len() >= max_messages {
                break;
            }

            let is_visible = msg.visible_at.map(|vt| vt <= now).unwrap_or(true);
            if !is_visible {
                continue;
            }

            let deserialized = T::from_json(msg.body.clone())?;
            msg.visible_at = Some(visible_until);
            msg.receive_count += 1;

            received.push(QueuedMessage {
                receipt_handle: ReceiptHandle(msg.id),
                message: deserialized,
                receive_count: msg.receive_count,
                enqueued_at: msg.enqueued_at,
            });
        }

        Ok(received)
    }

    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let pos = queue.position(receipt_handle)?;
        queue.messages.remove(pos);
        Ok(())
    }

    async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let pos = queue.position(receipt_handle)?;
        if requeue {
            if let Some(msg) = queue.messages.get_mut(pos) {
                msg.visible_at = None;
            }
        } else {
            queue.messages.remove(pos);
        }
        Ok(())
    }

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError> {
        let queues = self.queues.read().await;
        let queue = queues
            .get(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let now = Instant::now();
        let in_flight_count = queue
            .messages
            .iter()
            .filter(|m| m.visible_at.map(|vt| vt > now).unwrap_or(false))
            .count() as u64;

        let oldest_message_age = queue
            .messages
            .front()
            .map(|oldest| (Utc::now() - oldest.enqueued_at).to_std().unwrap_or_default());

        Ok(QueueStats {
            queue_name: queue_name.to_string(),
            message_count: queue.messages.len() as u64,
            in_flight_count,
            oldest_message_age,
        })
    }

    async fn health_check(&self) -> Result<bool, MessagingError> {
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}
