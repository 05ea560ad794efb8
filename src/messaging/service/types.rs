//! # Messaging Service Types
//!
//! Both providers number their messages with a per-queue `BIGINT`, so ids and
//! receipt handles are plain `i64` newtypes.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Id assigned by the broker when a message is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle a consumer uses to ack or nack the delivery it received
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(pub i64);

impl ReceiptHandle {
    pub fn message_id(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One delivery of a message
#[derive(Debug, Clone)]
pub struct QueuedMessage<T> {
    pub receipt_handle: ReceiptHandle,
    pub message: T,
    /// Deliveries so far, including this one
    pub receive_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl<T> QueuedMessage<T> {
    /// The broker handed this message out before and it was never acked
    pub fn is_redelivery(&self) -> bool {
        self.receive_count > 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueStats {
    pub queue_name: String,
    /// Visible plus in-flight messages
    pub message_count: u64,
    pub in_flight_count: u64,
    pub oldest_message_age: Option<Duration>,
}

/// Which expected queues exist after bootstrap
#[derive(Debug, Clone, Default)]
pub struct QueueHealthReport {
    pub healthy: Vec<String>,
    pub missing: Vec<String>,
    pub errors: Vec<(String, String)>,
}

impl QueueHealthReport {
    pub fn is_healthy(&self) -> bool {
        self.missing.is_empty() && self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redelivery_flag() {
        let delivery = |receive_count| QueuedMessage {
            receipt_handle: ReceiptHandle(1),
            message: (),
            receive_count,
            enqueued_at: Utc::now(),
        };
        assert!(!delivery(1).is_redelivery());
        assert!(delivery(2).is_redelivery());
    }

    #[test]
    fn test_health_report() {
        let mut report = QueueHealthReport::default();
        report.healthy.push("partition_requests".to_string());
        assert!(report.is_healthy());
        report.missing.push("partition_replies".to_string());
        assert!(!report.is_healthy());
    }
}
