//! # Messaging Service Abstraction
//!
//! Provider-agnostic broker operations with enum dispatch.
//!
//! ```text
//! MessagingProvider (enum)
//!   ├── Pgmq(PgmqMessagingService)
//!   └── InMemory(InMemoryMessagingService)
//! ```

mod provider;
pub mod providers;
mod traits;
mod types;

pub use provider::MessagingProvider;
pub use providers::{InMemoryMessagingService, PgmqMessagingService};
pub use traits::{MessagingService, QueueMessage};
pub use types::{MessageId, QueueHealthReport, QueueStats, QueuedMessage, ReceiptHandle};

pub use super::errors::MessagingError;
