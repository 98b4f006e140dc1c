//! Key resolver implementation.
//!
//! Transforms raw change events into `IndexableDocument` structures by parsing
//! the composite event key.

use serde_json::Value;
use thiserror::Error;

use cdc_indexer_shared::{IndexableDocument, RawEvent, ResourceType};

/// Minimum number of `/`-delimited segments in an event key.
pub const MIN_KEY_SEGMENTS: usize = 5;

const TENANT_SEGMENT: usize = 1;
const RESOURCE_SEGMENT: usize = 3;
const LOCAL_ID_SEGMENT: usize = 4;

/// Deterministic reasons an event cannot be resolved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The key has fewer than [`MIN_KEY_SEGMENTS`] segments.
    #[error("malformed key {key:?}: {segments} segments, expected at least 5")]
    MalformedKey { key: String, segments: usize },

    /// `after.value.object` is absent.
    #[error("missing object for key {key:?}")]
    MissingObject { key: String },

    /// Neither `object.id` nor the key's local id is usable.
    #[error("empty identity for key {key:?}")]
    EmptyIdentity { key: String },
}

/// Resolver that transforms raw change events into indexable documents.
///
/// The resolver holds no state and can be shared freely between tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyResolver;

impl KeyResolver {
    /// Create a new key resolver.
    pub fn new() -> Self {
        Self
    }

    /// Resolve a single event.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(doc))` - The document to index or delete
    /// * `Ok(None)` - The event has no `after` state and is skipped
    /// * `Err(ResolveError)` - The event can never be resolved
    pub fn resolve(&self, event: &RawEvent) -> Result<Option<IndexableDocument>, ResolveError> {
        let Some(after) = event.after.as_ref() else {
            return Ok(None);
        };

        let segments: Vec<&str> = after.key.split('/').collect();
        if segments.len() < MIN_KEY_SEGMENTS {
            return Err(ResolveError::MalformedKey {
                key: after.key.clone(),
                segments: segments.len(),
            });
        }

        let tenant_id = segments[TENANT_SEGMENT];
        let resource_type = ResourceType::parse(segments[RESOURCE_SEGMENT]);

        let object = after
            .value
            .object
            .as_ref()
            .ok_or_else(|| ResolveError::MissingObject {
                key: after.key.clone(),
            })?;

        let id = object
            .get("id")
            .and_then(identity_from_value)
            .or_else(|| {
                let local_id = segments[LOCAL_ID_SEGMENT];
                (!local_id.is_empty()).then(|| local_id.to_string())
            })
            .ok_or_else(|| ResolveError::EmptyIdentity {
                key: after.key.clone(),
            })?;

        Ok(Some(IndexableDocument::new(
            &id,
            &resource_type,
            tenant_id,
            event.is_delete(),
            object.clone(),
        )))
    }
}

/// Non-empty textual identity carried by `object.id`.
fn identity_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdc_indexer_shared::{After, AfterValue};
    use serde_json::json;

    fn event(op: &str, key: &str, object: Option<Value>) -> RawEvent {
        RawEvent {
            before: None,
            after: Some(After {
                key: key.to_string(),
                value: AfterValue {
                    kind: 0,
                    object: object.map(|o| o.as_object().cloned().unwrap()),
                },
            }),
            op: op.to_string(),
            timestamp_millis: 0,
        }
    }

    #[test]
    fn test_resolve_without_after_is_skipped() {
        let resolver = KeyResolver::new();
        let event = RawEvent {
            op: "u".to_string(),
            ..Default::default()
        };

        assert_eq!(resolver.resolve(&event), Ok(None));
    }

    #[test]
    fn test_resolve_malformed_key() {
        let resolver = KeyResolver::new();

        for key in ["", "a", "/t1/x/service", "t1/x/service/svc1"] {
            let result = resolver.resolve(&event("c", key, Some(json!({"id": "a"}))));
            assert!(
                matches!(result, Err(ResolveError::MalformedKey { .. })),
                "expected MalformedKey for {:?}",
                key
            );
        }
    }

    #[test]
    fn test_resolve_missing_object() {
        let resolver = KeyResolver::new();
        let result = resolver.resolve(&event("c", "/t1/x/node/n1", None));

        assert!(matches!(result, Err(ResolveError::MissingObject { .. })));
    }

    #[test]
    fn test_resolve_empty_identity() {
        let resolver = KeyResolver::new();
        let result = resolver.resolve(&event("c", "/t1/x/node/", Some(json!({"id": ""}))));

        assert!(matches!(result, Err(ResolveError::EmptyIdentity { .. })));
    }

    #[test]
    fn test_delete_falls_back_to_local_id() {
        let resolver = KeyResolver::new();
        let doc = resolver
            .resolve(&event("d", "/t1/x/service/svc1", Some(json!({}))))
            .unwrap()
            .unwrap();

        assert_eq!(doc.id, "svc1");
        assert!(doc.should_delete);
        assert_eq!(doc.index, "kong-services");
    }

    #[test]
    fn test_create_uses_object_id() {
        let resolver = KeyResolver::new();
        let doc = resolver
            .resolve(&event("c", "/t1/x/node/n1", Some(json!({"id": "node-1"}))))
            .unwrap()
            .unwrap();

        assert_eq!(doc.id, "node-1");
        assert!(!doc.should_delete);
        assert_eq!(doc.index, "kong-nodes");

        let metadata = doc.metadata().unwrap();
        assert_eq!(metadata.get("resource_type"), Some(&json!("node")));
        assert_eq!(metadata.get("tenant_id"), Some(&json!("t1")));
        assert_eq!(metadata.get("cid"), Some(&json!("t1")));
        assert_eq!(doc.data.get("id"), Some(&json!("node-1")));
    }

    #[test]
    fn test_identity_is_normalized() {
        let resolver = KeyResolver::new();
        let doc = resolver
            .resolve(&event("u", "/t1/x/upstream/u1/extra", Some(json!({"id": "a/b"}))))
            .unwrap()
            .unwrap();

        assert_eq!(doc.id, "a-b");
        assert!(!doc.id.contains('/'));
        assert_eq!(doc.index, "kong-upstreams");
    }

    #[test]
    fn test_numeric_identity() {
        let resolver = KeyResolver::new();
        let doc = resolver
            .resolve(&event("c", "/t1/x/store_event/e1", Some(json!({"id": 42}))))
            .unwrap()
            .unwrap();

        assert_eq!(doc.id, "42");
        assert_eq!(doc.index, "kong-events");
    }

    #[test]
    fn test_unknown_resource_routes_to_default() {
        let resolver = KeyResolver::new();
        let doc = resolver
            .resolve(&event("c", "/t1/x/plugin/p1", Some(json!({"name": "rate-limit"}))))
            .unwrap()
            .unwrap();

        assert_eq!(doc.id, "p1");
        assert_eq!(doc.index, "kong-default");
    }
}
