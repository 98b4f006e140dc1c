//! Search index provider trait definition.
//!
//! This module defines the abstract interface for document store operations,
//! allowing for different backend implementations (OpenSearch, in-memory fakes, etc.).

use async_trait::async_trait;

use crate::errors::SearchIndexError;
use crate::types::{BatchOperationSummary, BulkAction, DeleteDocumentRequest};

/// Abstracts the underlying document store (OpenSearch, Elasticsearch, etc.).
///
/// Implementations are injected into the buffered indexer and the indexing
/// pipeline, so both can be exercised against mock implementations.
///
/// # Index Initialization
///
/// Call `ensure_index_exists` during application startup so that every
/// resource index is present before documents are written.
#[async_trait]
pub trait SearchIndexProvider: Send + Sync {
    /// Ensure every resource index exists, creating missing ones.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If all indices are ready for use
    /// * `Err(SearchIndexError)` - If the store is unreachable or creation fails
    async fn ensure_index_exists(&self) -> Result<(), SearchIndexError>;

    /// Delete a single document.
    ///
    /// If the document doesn't exist, the operation is considered successful,
    /// which makes repeated deletes of the same id idempotent.
    ///
    /// # Arguments
    ///
    /// * `request` - The index and id of the document
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If the document was deleted (or didn't exist)
    /// * `Err(SearchIndexError)` - If the deletion fails
    async fn delete_document(&self, request: &DeleteDocumentRequest)
        -> Result<(), SearchIndexError>;

    /// Send every action in one bulk request.
    ///
    /// # Arguments
    ///
    /// * `actions` - Index and delete actions, in the order they must be applied
    ///
    /// # Returns
    ///
    /// * `Ok(BatchOperationSummary)` - Per-item outcome, in request order
    /// * `Err(SearchIndexError)` - If the bulk call failed as a whole
    async fn bulk(&self, actions: &[BulkAction]) -> Result<BatchOperationSummary, SearchIndexError>;
}
