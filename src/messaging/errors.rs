//! # Messaging Error Types
//!
//! Broker failures seen by the transport. Every variant names the queue when
//! one is involved, so a log line alone identifies the failing side.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MessagingError {
    #[error("Broker connection error: {message}")]
    Connection { message: String },

    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    /// A broker call on a specific queue failed
    #[error("Queue operation failed: {queue_name}: {operation}: {message}")]
    QueueOperation {
        queue_name: String,
        operation: String,
        message: String,
    },

    #[error("Message serialization error: {message}")]
    Serialization { message: String },

    /// Body could not be decoded into the expected message type
    #[error("Message deserialization error: {message}")]
    Deserialization { message: String },

    #[error("Invalid queue configuration: {component}: {message}")]
    Configuration { component: String, message: String },

    /// Receipt handle does not refer to a message held by the queue
    #[error("Unknown receipt: {handle}")]
    UnknownReceipt { handle: String },

    /// In-process channel between a producer and its publisher task is gone
    #[error("Transport closed: {message}")]
    Closed { message: String },
}

impl MessagingError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn queue_not_found(queue_name: impl Into<String>) -> Self {
        Self::QueueNotFound {
            queue_name: queue_name.into(),
        }
    }

    fn on_queue(
        queue_name: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::QueueOperation {
            queue_name: queue_name.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn queue_creation(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::on_queue(queue_name, "create", message)
    }

    pub fn send(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::on_queue(queue_name, "send", message)
    }

    pub fn receive(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::on_queue(queue_name, "receive", message)
    }

    pub fn ack(queue_name: impl Into<String>, message_id: i64, message: impl Into<String>) -> Self {
        Self::on_queue(queue_name, format!("ack(msg_id={message_id})"), message)
    }

    pub fn nack(queue_name: impl Into<String>, message_id: i64, message: impl Into<String>) -> Self {
        Self::on_queue(queue_name, format!("nack(msg_id={message_id})"), message)
    }

    pub fn queue_stats(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::on_queue(queue_name, "queue_stats", message)
    }

    pub fn health_check(message: impl Into<String>) -> Self {
        Self::connection(format!("health check failed: {}", message.into()))
    }

    pub fn message_serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn message_deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization {
            message: message.into(),
        }
    }

    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn message_not_found(message_id: impl Into<String>) -> Self {
        Self::UnknownReceipt {
            handle: message_id.into(),
        }
    }

    pub fn closed(message: impl Into<String>) -> Self {
        Self::Closed {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_data() || err.is_eof() {
            Self::message_deserialization(err.to_string())
        } else {
            Self::message_serialization(err.to_string())
        }
    }
}

pub type MessagingResult<T> = Result<T, MessagingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_operations_name_the_queue() {
        let err = MessagingError::send("partition_requests", "connection reset");
        assert_eq!(
            err.to_string(),
            "Queue operation failed: partition_requests: send: connection reset"
        );

        let err = MessagingError::ack("partition_replies", 42, "gone");
        assert!(err.to_string().contains("ack(msg_id=42)"));
    }

    #[test]
    fn test_json_error_classification() {
        let err: MessagingError = serde_json::from_str::<serde_json::Value>("{nope")
            .unwrap_err()
            .into();
        assert!(matches!(err, MessagingError::Deserialization { .. }));
    }
}
