//! Request and response types for document store operations.

use cdc_indexer_shared::IndexableDocument;
use serde_json::{Map, Value};

use crate::errors::SearchIndexError;

/// One action of a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkAction {
    /// Create or replace the document `id` in `index` with `source`.
    Index {
        index: String,
        id: String,
        source: Map<String, Value>,
    },
    /// Remove the document `id` from `index`.
    Delete { index: String, id: String },
}

impl BulkAction {
    /// The document id targeted by this action.
    pub fn id(&self) -> &str {
        match self {
            Self::Index { id, .. } | Self::Delete { id, .. } => id,
        }
    }

    /// The index targeted by this action.
    pub fn index(&self) -> &str {
        match self {
            Self::Index { index, .. } | Self::Delete { index, .. } => index,
        }
    }

    /// The bulk directive name (`index` or `delete`).
    pub fn directive(&self) -> &'static str {
        match self {
            Self::Index { .. } => "index",
            Self::Delete { .. } => "delete",
        }
    }
}

impl From<&IndexableDocument> for BulkAction {
    fn from(doc: &IndexableDocument) -> Self {
        if doc.should_delete {
            Self::Delete {
                index: doc.index.clone(),
                id: doc.id.clone(),
            }
        } else {
            Self::Index {
                index: doc.index.clone(),
                id: doc.id.clone(),
                source: doc.data.clone(),
            }
        }
    }
}

/// Request to delete a single document from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteDocumentRequest {
    /// The index holding the document.
    pub index: String,
    /// The document id.
    pub id: String,
}

impl From<&IndexableDocument> for DeleteDocumentRequest {
    fn from(doc: &IndexableDocument) -> Self {
        Self {
            index: doc.index.clone(),
            id: doc.id.clone(),
        }
    }
}

/// Result of a bulk operation for a single item.
#[derive(Debug, Clone)]
pub struct BatchOperationResult {
    /// The document id.
    pub id: String,
    /// The index the item targeted.
    pub index: String,
    /// Whether the operation succeeded.
    pub success: bool,
    /// HTTP status reported for the item, when the store reported one.
    pub status: Option<u16>,
    /// Error if the operation failed.
    pub error: Option<SearchIndexError>,
}

/// Summary of a bulk operation containing aggregate statistics and individual results.
///
/// Results are in the same order as the actions of the request, which lets
/// callers map failures back to the documents they came from.
#[derive(Debug, Clone, Default)]
pub struct BatchOperationSummary {
    /// Total number of items in the batch.
    pub total: usize,
    /// Number of successful operations.
    pub succeeded: usize,
    /// Number of failed operations.
    pub failed: usize,
    /// Individual results for each item.
    pub results: Vec<BatchOperationResult>,
}

impl BatchOperationSummary {
    /// Build a summary from per-item results.
    pub fn from_results(results: Vec<BatchOperationResult>) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            results,
        }
    }

    /// Whether any item failed.
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdc_indexer_shared::ResourceType;
    use serde_json::json;

    #[test]
    fn test_bulk_action_from_document() {
        let data = json!({"name": "billing"}).as_object().cloned().unwrap();
        let doc = IndexableDocument::new("svc1", &ResourceType::Service, "t1", false, data);

        let action = BulkAction::from(&doc);
        assert_eq!(action.directive(), "index");
        assert_eq!(action.id(), "svc1");
        assert_eq!(action.index(), "kong-services");

        let delete = IndexableDocument::new("svc1", &ResourceType::Service, "t1", true, Map::new());
        assert_eq!(BulkAction::from(&delete).directive(), "delete");
    }

    #[test]
    fn test_summary_from_results() {
        let result = |success| BatchOperationResult {
            id: "a".to_string(),
            index: "kong-nodes".to_string(),
            success,
            status: Some(if success { 200 } else { 400 }),
            error: None,
        };

        let summary =
            BatchOperationSummary::from_results(vec![result(true), result(false), result(true)]);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert!(summary.has_failures());
    }
}
