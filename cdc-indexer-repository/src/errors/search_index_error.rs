//! Search index error types.
//!
//! This module defines the unified error type for all document store operations,
//! including both transport-level failures and store-level rejections.

use thiserror::Error;

/// Unified errors from document store operations.
///
/// Used by the `SearchIndexProvider` trait for every operation. Transport-level
/// failures (the request never got a response) are reported as
/// [`SearchIndexError::ConnectionError`] and are the only retryable variant.
#[derive(Debug, Clone, Error)]
pub enum SearchIndexError {
    /// Validation error (e.g., empty document id, empty bulk request).
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Failed to reach the document store.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Bulk operation was rejected or had failures.
    #[error("Bulk index error: {0}")]
    BulkIndexError(String),

    /// Failed to delete a document.
    #[error("Delete error: {0}")]
    DeleteError(String),

    /// Failed to create an index.
    #[error("Index creation error: {0}")]
    IndexCreationError(String),

    /// Failed to parse a response from the document store.
    #[error("Parse error: {0}")]
    ParseError(String),
}

impl SearchIndexError {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Create a bulk index error.
    pub fn bulk_index(msg: impl Into<String>) -> Self {
        Self::BulkIndexError(msg.into())
    }

    /// Create a delete error.
    pub fn delete(msg: impl Into<String>) -> Self {
        Self::DeleteError(msg.into())
    }

    /// Create an index creation error.
    pub fn index_creation(msg: impl Into<String>) -> Self {
        Self::IndexCreationError(msg.into())
    }

    /// Create a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }

    /// Whether the request may succeed if sent again unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connection_errors_are_transient() {
        assert!(SearchIndexError::connection("refused").is_transient());
        assert!(!SearchIndexError::bulk_index("rejected").is_transient());
        assert!(!SearchIndexError::delete("500").is_transient());
    }

    #[test]
    fn test_display() {
        let err = SearchIndexError::bulk_index("2 of 3 items failed");
        assert_eq!(err.to_string(), "Bulk index error: 2 of 3 items failed");
    }
}
