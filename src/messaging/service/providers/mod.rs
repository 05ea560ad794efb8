//! # Messaging Providers
//!
//! - [`PgmqMessagingService`] - PostgreSQL Message Queue
//! - [`InMemoryMessagingService`] - thread-safe in-memory queues for tests

mod in_memory;
mod pgmq_service;

pub use in_memory::InMemoryMessagingService;
pub use pgmq_service::PgmqMessagingService;
