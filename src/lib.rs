//! # bulk-rust
//!
//! Concurrent bulk loading of writes and deletes into a document store with a
//! batched write API, built on Tokio.
//!
//! ## Features
//!
//! - **Bounded ingress queue** giving callers natural backpressure
//! - **Concurrent batch execution** with a configurable worker pool
//! - **Partial-failure handling**: unprocessed items are retried, then sent
//!   one by one
//! - **Exponential backoff** per group, doubling on every retryable failure
//! - **Request-level retries** via [`store::AutoRetry`], backing off harder for
//!   capacity errors
//! - **Complete accounting**: every item shows up in exactly one result
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use bulk_rust::bulk::{BulkWriter, ConfigBuilder};
//! use bulk_rust::store::{Document, MemoryStore};
//! use std::sync::Arc;
//!
//! let config = ConfigBuilder::default()
//!     .table("people")
//!     .concurrency(4usize)
//!     .build()?;
//!
//! let writer = BulkWriter::new(Arc::new(MemoryStore::new(["Id"])), config);
//! let mut results = writer.results()?;
//! tokio::spawn(async move { while results.recv().await.is_some() {} });
//!
//! writer.write(Document::new().with("Id", 1).with("Name", "Ada")).await?;
//! writer.close_wait().await?;
//! ```
//!
//! ## Modules
//!
//! - [`bulk`] - The bulk writer pipeline: queue, batcher, workers
//! - [`retry`] - Error classification and backoff
//! - [`store`] - Store client contract, data model and an in-memory store
//! - [`observability`] - Logging setup helpers

pub mod bulk;
pub mod observability;
pub mod retry;
pub mod store;

pub use bulk::{BulkError, BulkResult, BulkWriter, Config, ConfigBuilder, ResultStream};
pub use store::{Document, StoreClient, StoreError};
