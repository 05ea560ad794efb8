//! # Messaging Service Traits

use std::time::Duration;

use async_trait::async_trait;

use super::types::{MessageId, QueueHealthReport, QueueStats, QueuedMessage, ReceiptHandle};
use super::MessagingError;

/// Queue operations shared by the pgmq and in-memory brokers.
///
/// A received message stays hidden for its visibility timeout. If it is not
/// acked in that window it becomes visible again, which is how a worker that
/// crashed or failed to reach the ledger gets its request redelivered.
#[async_trait]
pub trait MessagingService: Send + Sync + 'static {
    /// Idempotent
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError>;

    async fn ensure_queues(&self, queue_names: &[String]) -> Result<(), MessagingError> {
        for queue_name in queue_names {
            self.ensure_queue(queue_name).await?;
        }
        Ok(())
    }

    async fn verify_queues(
        &self,
        queue_names: &[String],
    ) -> Result<QueueHealthReport, MessagingError>;

    async fn send_message<T: QueueMessage>(
        &self,
        queue_name: &str,
        message: &T,
    ) -> Result<MessageId, MessagingError>;

    /// Receive up to `max_messages`, hiding them from other consumers for
    /// `visibility_timeout`
    async fn receive_messages<T: QueueMessage>(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<T>>, MessagingError>;

    /// Remove a delivered message for good
    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError>;

    /// Give a delivery back. With `requeue` it is visible again at once,
    /// without it the message is dropped (pgmq archives it).
    async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError>;

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError>;

    async fn health_check(&self) -> Result<bool, MessagingError>;

    fn provider_name(&self) -> &'static str;
}

/// A message body both providers can carry.
///
/// pgmq stores bodies as JSONB, so the common form is a `serde_json::Value`
/// rather than raw bytes.
pub trait QueueMessage: Sized + Send + Sync + 'static {
    fn to_json(&self) -> Result<serde_json::Value, MessagingError>;

    fn from_json(value: serde_json::Value) -> Result<Self, MessagingError>;
}

impl<T> QueueMessage for T
where
    T: serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
{
    fn to_json(&self) -> Result<serde_json::Value, MessagingError> {
        serde_json::to_value(self).map_err(|e| MessagingError::message_serialization(e.to_string()))
    }

    fn from_json(value: serde_json::Value) -> Result<Self, MessagingError> {
        serde_json::from_value(value)
            .map_err(|e| MessagingError::message_deserialization(e.to_string()))
    }
}
