//! # CDC Indexer Repository
//!
//! This crate provides traits and implementations for writing to the
//! document store. It includes definitions for errors, interfaces, bulk
//! request types, and a concrete implementation for OpenSearch.

pub mod errors;
pub mod interfaces;
pub mod opensearch;
pub mod types;

pub use errors::SearchIndexError;
pub use interfaces::SearchIndexProvider;
pub use opensearch::OpenSearchProvider;
pub use types::{BatchOperationResult, BatchOperationSummary, BulkAction, DeleteDocumentRequest};
