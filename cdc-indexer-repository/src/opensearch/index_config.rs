//! OpenSearch index configuration and settings.
//!
//! This module defines the settings applied to every resource index when it
//! is created at startup.

use cdc_indexer_shared::ResourceType;
use serde_json::{json, Value};

/// Configuration shared by all resource indices.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Names of the indices to create at startup.
    pub indices: Vec<String>,
    /// Number of primary shards per index.
    pub number_of_shards: u32,
    /// Number of replicas per index.
    pub number_of_replicas: u32,
    /// How many times a request is re-sent after a transport failure.
    pub max_retries: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            indices: ResourceType::known_indices()
                .iter()
                .map(|name| name.to_string())
                .collect(),
            number_of_shards: 1,
            number_of_replicas: 0,
            max_retries: 3,
        }
    }
}

impl IndexConfig {
    /// Create a configuration covering every resource index.
    ///
    /// # Arguments
    ///
    /// * `max_retries` - Retries for requests that failed at the transport level
    pub fn new(max_retries: usize) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }
}

/// Get the settings body used when creating a resource index.
///
/// Documents are stored with dynamic mappings; only the `_metadata` fields
/// are mapped explicitly so they can be filtered on exactly.
pub fn get_index_settings(config: &IndexConfig) -> Value {
    json!({
        "settings": {
            "index": {
                "number_of_shards": config.number_of_shards,
                "number_of_replicas": config.number_of_replicas
            }
        },
        "mappings": {
            "properties": {
                "_metadata": {
                    "properties": {
                        "resource_type": { "type": "keyword" },
                        "tenant_id": { "type": "keyword" },
                        "cid": { "type": "keyword" }
                    }
                }
            }
        }
    })
}
