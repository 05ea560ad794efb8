//! # Messaging Provider

use std::time::Duration;

use super::providers::{InMemoryMessagingService, PgmqMessagingService};
use super::traits::{MessagingService, QueueMessage};
use super::types::{MessageId, QueueHealthReport, QueueStats, QueuedMessage, ReceiptHandle};
use super::MessagingError;

/// The broker a process talks to.
///
/// `MessagingService` has generic methods and is not object safe, so the
/// transport holds this enum and forwards each call to the active variant.
#[derive(Debug)]
pub enum MessagingProvider {
    Pgmq(PgmqMessagingService),
    InMemory(InMemoryMessagingService),
}

/// Forward a call to whichever service the provider wraps
macro_rules! forward {
    ($provider:expr, $service:ident => $call:expr) => {
        match $provider {
            MessagingProvider::Pgmq($service) => $call,
            MessagingProvider::InMemory($service) => $call,
        }
    };
}

impl MessagingProvider {
    pub fn new_in_memory() -> Self {
        InMemoryMessagingService::new().into()
    }

    pub fn provider_name(&self) -> &'static str {
        forward!(self, s => s.provider_name())
    }

    pub async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        forward!(self, s => s.ensure_queue(queue_name).await)
    }

    pub async fn ensure_queues(&self, queue_names: &[String]) -> Result<(), MessagingError> {
        forward!(self, s => s.ensure_queues(queue_names).await)
    }

    pub async fn verify_queues(
        &self,
        queue_names: &[String],
    ) -> Result<QueueHealthReport, MessagingError> {
        forward!(self, s => s.verify_queues(queue_names).await)
    }

    pub async fn send_message<T: QueueMessage>(
        &self,
        queue_name: &str,
        message: &T,
    ) -> Result<MessageId, MessagingError> {
        forward!(self, s => s.send_message(queue_name, message).await)
    }

    pub async fn receive_messages<T: QueueMessage>(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<T>>, MessagingError> {
        forward!(self, s => s.receive_messages(queue_name, max_messages, visibility_timeout).await)
    }

    pub async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        forward!(self, s => s.ack_message(queue_name, receipt_handle).await)
    }

    pub async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        forward!(self, s => s.nack_message(queue_name, receipt_handle, requeue).await)
    }

    pub async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError> {
        forward!(self, s => s.queue_stats(queue_name).await)
    }

    pub async fn health_check(&self) -> Result<bool, MessagingError> {
        forward!(self, s => s.health_check().await)
    }

    /// Test hook for inspecting in-memory queues
    pub fn as_in_memory(&self) -> Option<&InMemoryMessagingService> {
        match self {
            Self::InMemory(s) => Some(s),
            Self::Pgmq(_) => None,
        }
    }
}

impl From<InMemoryMessagingService> for MessagingProvider {
    fn from(service: InMemoryMessagingService) -> Self {
        Self::InMemory(service)
    }
}

impl From<PgmqMessagingService> for MessagingProvider {
    fn from(service: PgmqMessagingService) -> Self {
        Self::Pgmq(service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_dispatch() {
        let provider = MessagingProvider::new_in_memory();
        assert_eq!(provider.provider_name(), "in_memory");

        provider
            .ensure_queues(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        let report = provider
            .verify_queues(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert!(report.is_healthy());

        provider
            .send_message("a", &serde_json::json!({"k": 1}))
            .await
            .unwrap();
        let stats = provider.queue_stats("a").await.unwrap();
        assert_eq!(stats.message_count, 1);
        assert!(provider.health_check().await.unwrap());
        assert!(provider.as_in_memory().is_some());
    }
}
