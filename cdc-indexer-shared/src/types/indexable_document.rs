//! Indexable document types for the search store.
//!
//! This module defines the document structure handed to the buffered indexer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::resource::ResourceType;

/// Field under which resolution metadata is stamped into `data`.
pub const METADATA_FIELD: &str = "_metadata";

/// Document representation handed to the indexer.
///
/// Constructed once per [`RawEvent`](crate::RawEvent) and never mutated
/// afterwards.
///
/// # Fields
///
/// - `id`: Identity of the document within its index; never empty, never contains `/`
/// - `index`: Logical index the document is routed to
/// - `should_delete`: Whether the document must be removed from the index
/// - `data`: Object body, including the `_metadata` sub-map
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexableDocument {
    pub id: String,
    pub index: String,
    pub should_delete: bool,
    pub data: Map<String, Value>,
}

impl IndexableDocument {
    /// Create a document, normalizing `id` and stamping `_metadata` into `data`.
    ///
    /// # Example
    ///
    /// ```
    /// use cdc_indexer_shared::{IndexableDocument, ResourceType};
    /// use serde_json::Map;
    ///
    /// let doc = IndexableDocument::new("a/b", &ResourceType::Node, "t1", false, Map::new());
    /// assert_eq!(doc.id, "a-b");
    /// assert_eq!(doc.index, "kong-nodes");
    /// ```
    pub fn new(
        id: &str,
        resource_type: &ResourceType,
        tenant_id: &str,
        should_delete: bool,
        mut data: Map<String, Value>,
    ) -> Self {
        let mut metadata = Map::new();
        metadata.insert(
            "resource_type".to_string(),
            Value::from(resource_type.as_str()),
        );
        metadata.insert("tenant_id".to_string(), Value::from(tenant_id));
        metadata.insert("cid".to_string(), Value::from(tenant_id));
        data.insert(METADATA_FIELD.to_string(), Value::Object(metadata));

        Self {
            id: normalize_document_id(id),
            index: resource_type.index_name().to_string(),
            should_delete,
            data,
        }
    }

    /// Whether `data` carries any field besides `_metadata`.
    pub fn has_body(&self) -> bool {
        self.data.keys().any(|key| key != METADATA_FIELD)
    }

    /// The `_metadata` sub-map, if present.
    pub fn metadata(&self) -> Option<&Map<String, Value>> {
        self.data.get(METADATA_FIELD).and_then(Value::as_object)
    }
}

/// Make an identity safe to use as a store document key.
///
/// Every `/` becomes `-`. Idempotent.
pub fn normalize_document_id(id: &str) -> String {
    id.replace('/', "-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_new_stamps_metadata() {
        let doc = IndexableDocument::new(
            "svc1",
            &ResourceType::Service,
            "t1",
            false,
            object(json!({"name": "billing"})),
        );

        let metadata = doc.metadata().unwrap();
        assert_eq!(metadata.get("resource_type"), Some(&json!("service")));
        assert_eq!(metadata.get("tenant_id"), Some(&json!("t1")));
        assert_eq!(metadata.get("cid"), Some(&json!("t1")));
        assert_eq!(doc.data.get("name"), Some(&json!("billing")));
        assert_eq!(doc.index, "kong-services");
    }

    #[test]
    fn test_has_body() {
        let empty = IndexableDocument::new("a", &ResourceType::Node, "t1", false, Map::new());
        assert!(!empty.has_body());

        let full = IndexableDocument::new(
            "a",
            &ResourceType::Node,
            "t1",
            false,
            object(json!({"id": "a"})),
        );
        assert!(full.has_body());
    }

    #[test]
    fn test_normalize_document_id() {
        assert_eq!(normalize_document_id("a/b/c"), "a-b-c");
        assert_eq!(normalize_document_id("plain"), "plain");

        let once = normalize_document_id("x//y/");
        assert_eq!(normalize_document_id(&once), once);
    }
}
