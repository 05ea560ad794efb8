//! # PGMQ Messaging Service
//!
//! PostgreSQL Message Queue provider built on the `pgmq` crate. Queue tables
//! live in the `pgmq` schema as `pgmq.q_<queue_name>`; visibility reset,
//! verification and statistics query those tables directly.

use std::time::Duration;

use async_trait::async_trait;
use pgmq::PGMQueue;
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::config::is_plain_identifier;
use crate::messaging::service::traits::{MessagingService, QueueMessage};
use crate::messaging::service::types::{
    MessageId, QueueHealthReport, QueueStats, QueuedMessage, ReceiptHandle,
};
use crate::messaging::MessagingError;

#[derive(Debug, Clone)]
pub struct PgmqMessagingService {
    queue: PGMQueue,
}

impl PgmqMessagingService {
    /// Connect using a database URL
    pub async fn new(database_url: &str) -> Result<Self, MessagingError> {
        let queue = PGMQueue::new(database_url.to_string())
            .await
            .map_err(|e| MessagingError::connection(e.to_string()))?;
        Ok(Self { queue })
    }

    /// Share an existing connection pool with the ledger
    pub async fn new_with_pool(pool: PgPool) -> Self {
        let queue = PGMQueue::new_with_pool(pool).await;
        Self { queue }
    }

    pub fn pool(&self) -> &PgPool {
        &self.queue.connection
    }

    fn table_name(queue_name: &str) -> Result<String, MessagingError> {
        if is_plain_identifier(queue_name) {
            Ok(format!("pgmq.q_{queue_name}"))
        } else {
            Err(MessagingError::configuration(
                "pgmq",
                format!("invalid queue name: {queue_name}"),
            ))
        }
    }

}

#[async_trait]
impl MessagingService for PgmqMessagingService {
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        Self::table_name(queue_name)?;
        self.queue
            .create(queue_name)
            .await
            .map_err(|e| MessagingError::queue_creation(queue_name, e.to_string()))
    }

    async fn verify_queues(
        &self,
        queue_names: &[String],
    ) -> Result<QueueHealthReport, MessagingError> {
        let mut report = QueueHealthReport::default();

        for queue_name in queue_names {
            let table = match Self::table_name(queue_name) {
                Ok(table) => table,
                Err(e) => {
                    report.errors.push((queue_name.clone(), e.to_string()));
                    continue;
                }
            };

            let exists = sqlx::query("SELECT to_regclass($1) IS NOT NULL AS present")
                .bind(&table)
                .fetch_one(self.pool())
                .await
                .and_then(|row| row.try_get::<bool, _>("present"));

            match exists {
                Ok(true) => report.healthy.push(queue_name.clone()),
                Ok(false) => report.missing.push(queue_name.clone()),
                Err(e) => report.errors.push((queue_name.clone(), e.to_string())),
            }
        }

        Ok(report)
    }

    async fn send_message<T: QueueMessage>(
        &self,
        queue_name: &str,
        message: &T,
    ) -> Result<MessageId, MessagingError> {
        let body = message.to_json()?;

        let msg_id = self
            .queue
            .send(queue_name, &body)
            .await
            .map_err(|e| MessagingError::send(queue_name, e.to_string()))?;

        debug!(queue = %queue_name, msg_id, "Message sent");
        Ok(MessageId(msg_id))
    }

    async fn receive_messages<T: QueueMessage>(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<T>>, MessagingError> {
        let vt_seconds = i32::try_from(visibility_timeout.as_secs()).unwrap_or(i32::MAX);
        let limit = i32::try_from(max_messages).unwrap_or(i32::MAX);

        let messages = self
            .queue
            .read_batch::<serde_json::Value>(queue_name, Some(vt_seconds), limit)
            .await
            .map_err(|e| MessagingError::receive(queue_name, e.to_string()))?
            .unwrap_or_default();

        let mut result = Vec::with_capacity(messages.len());
        for msg in messages {
            result.push(QueuedMessage {
                receipt_handle: ReceiptHandle(msg.msg_id),
                message: T::from_json(msg.message)?,
                receive_count: u32::try_from(msg.read_ct).unwrap_or(0),
                enqueued_at: msg.enqueued_at,
            });
        }

        Ok(result)
    }

    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        let message_id = receipt_handle.message_id();

        // Archive keeps an audit trail in pgmq.a_<queue_name>
        self.queue
            .archive(queue_name, message_id)
            .await
            .map(|_| ())
            .map_err(|e| MessagingError::ack(queue_name, message_id, e.to_string()))
    }

    async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        let message_id = receipt_handle.message_id();

        if requeue {
            let table = Self::table_name(queue_name)?;
            sqlx::query(&format!("UPDATE {table} SET vt = NOW() WHERE msg_id = $1"))
                .bind(message_id)
                .execute(self.pool())
                .await
                .map_err(|e| MessagingError::nack(queue_name, message_id, e.to_string()))?;
        } else {
            self.queue
                .archive(queue_name, message_id)
                .await
                .map_err(|e| MessagingError::nack(queue_name, message_id, e.to_string()))?;
        }

        Ok(())
    }

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError> {
        let table = Self::table_name(queue_name)?;
        let row = sqlx::query(&format!(
            "SELECT COUNT(*)::BIGINT AS message_count, \
                    COUNT(*) FILTER (WHERE vt > NOW())::BIGINT AS in_flight, \
                    EXTRACT(EPOCH FROM (NOW() - MIN(enqueued_at)))::BIGINT AS oldest_age_seconds \
             FROM {table}"
        ))
        .fetch_one(self.pool())
        .await
        .map_err(|e| MessagingError::queue_stats(queue_name, e.to_string()))?;

        let message_count: i64 = row
            .try_get("message_count")
            .map_err(|e| MessagingError::queue_stats(queue_name, e.to_string()))?;
        let in_flight: i64 = row
            .try_get("in_flight")
            .map_err(|e| MessagingError::queue_stats(queue_name, e.to_string()))?;
        let oldest: Option<i64> = row
            .try_get("oldest_age_seconds")
            .map_err(|e| MessagingError::queue_stats(queue_name, e.to_string()))?;

        Ok(QueueStats {
            queue_name: queue_name.to_string(),
            message_count: message_count.max(0) as u64,
            in_flight_count: in_flight.max(0) as u64,
            oldest_message_age: oldest.map(|seconds| Duration::from_secs(seconds.max(0) as u64)),
        })
    }

    async fn health_check(&self) -> Result<bool, MessagingError> {
        sqlx::query("SELECT 1")
            .execute(self.pool())
            .await
            .map(|_| true)
            .map_err(|e| MessagingError::health_check(e.to_string()))
    }

    fn provider_name(&self) -> &'static str {
        "pgmq"
    }
}
