//! # CDC Indexer
//!
//! Change-data-capture indexer for Kong configuration entities. Publishes
//! change events to Kafka and projects them into per-resource OpenSearch
//! indices.
//!
//! ## Architecture
//!
//! Two pipelines share the queue and the event model:
//!
//! 1. **Ingestion**: Reads line-delimited events and publishes them to Kafka
//! 2. **Indexing**: Claims events, resolves them into documents and writes
//!    them to OpenSearch, buffering everything but deletes
//!
//! ## Modules
//!
//! - [`config`]: Settings and dependency initialization
//! - [`queue`]: Enqueue/dequeue ports with Kafka and in-memory adapters
//! - [`processor`]: Resolves change events into documents
//! - [`loader`]: Buffered bulk writes into OpenSearch
//! - [`orchestrator`]: Pipeline drivers and shutdown handling
//! - [`errors`]: Error types for the pipelines

pub mod config;
pub mod errors;
pub mod loader;
pub mod orchestrator;
pub mod processor;
pub mod queue;

pub use config::{Dependencies, RunMode, Settings};
pub use errors::IngestError;

use thiserror::Error;

/// Errors that can occur during indexer initialization or execution.
#[derive(Error, Debug)]
pub enum IndexingError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Ingest error.
    #[error("Ingest error: {0}")]
    IngestError(#[from] IngestError),
}

impl IndexingError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
