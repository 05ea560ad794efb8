//! # Messaging
//!
//! Broker abstraction, wire messages and the request/reply transport used by
//! the dispatcher and the workers.

pub mod errors;
pub mod message;
pub mod service;
pub mod transport;

pub use errors::{MessagingError, MessagingResult};
pub use message::{Reply, RequestContext, WorkRequest};
pub use service::{
    InMemoryMessagingService, MessageId, MessagingProvider, MessagingService,
    PgmqMessagingService, QueueHealthReport, QueueMessage, QueueStats, QueuedMessage,
    ReceiptHandle,
};
pub use transport::{DispatchChannel, DispatchSummary, MessageTransport, ReplyListener};
