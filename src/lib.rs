#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Partition Batch
//!
//! Partitioned batch jobs coordinated through a message queue and a shared
//! execution ledger.
//!
//! ## Overview
//!
//! A master process splits a table's key range into a fixed number of
//! partitions, records one step execution per partition in the ledger, and
//! publishes a work request for each. Any number of worker processes compete
//! for those requests, run the partition, and write the outcome back to the
//! ledger. The master polls the ledger until every partition is terminal or
//! its deadline passes.
//!
//! The broker delivers at least once, so workers treat a request whose record
//! is already terminal (or claimed) as done. Replies exist only to wake the
//! master early; losing them costs latency, not correctness.
//!
//! ## Module Organization
//!
//! - [`discovery`] - key range queries and partition computation
//! - [`orchestration`] - the master: dispatcher and job driver
//! - [`worker`] - request handler and competing-consumer pool
//! - [`ledger`] - job and step execution records
//! - [`messaging`] - broker abstraction (pgmq, in-memory) and transport
//! - [`runner`] - partition runners and the step registry
//! - [`state_machine`] - execution statuses and transition rules
//! - [`config`] - configuration management
//! - [`error`] - structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use partition_batch::config::JobConfig;
//! use partition_batch::discovery::StaticKeyRange;
//! use partition_batch::ledger::InMemoryExecutionLedger;
//! use partition_batch::messaging::{MessageTransport, MessagingProvider};
//! use partition_batch::orchestration::{PartitionDispatcher, PartitionedJob};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(MessageTransport::new(
//!     Arc::new(MessagingProvider::new_in_memory()),
//!     Default::default(),
//! ));
//! transport.bootstrap().await?;
//!
//! let ledger = Arc::new(InMemoryExecutionLedger::new());
//! let dispatcher = PartitionDispatcher::new(ledger, transport, JobConfig::default());
//! let job = PartitionedJob::new(StaticKeyRange(Some((1, 4000))), dispatcher);
//!
//! let result = job.run().await?;
//! println!("{} rows written", result.total_rows_written());
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit + integration tests
//! TEST_DATABASE_URL=postgresql://localhost/partition_test cargo test   # Postgres-backed tests too
//! ```

pub mod config;
pub mod constants;
pub mod database;
pub mod discovery;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod runner;
pub mod state_machine;
pub mod worker;

pub use config::{BatchConfig, ConfigManager, JobConfig, QueueConfig, WorkerConfig};
pub use discovery::{compute_partitions, ColumnRangePartitioner, KeyRangeSource};
pub use error::{BatchError, BatchResult};
pub use ledger::{ClaimOutcome, ExecutionLedger, InMemoryExecutionLedger, PgExecutionLedger};
pub use messaging::{MessageTransport, MessagingProvider, Reply, WorkRequest};
pub use models::{JobResult, Partition, PartitionBounds, StepExecution};
pub use orchestration::{PartitionDispatcher, PartitionedJob};
pub use runner::{PartitionRunner, RunSummary, RunnerError, StepRegistry};
pub use state_machine::{ExecutionStatus, JobStatus};
pub use worker::{WorkerPool, WorkerRequestHandler};
