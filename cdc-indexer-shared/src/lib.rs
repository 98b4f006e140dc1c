//! # CDC Indexer Shared
//!
//! This crate defines the data structures shared across the CDC indexer
//! ecosystem: the raw change event as it travels through Kafka, and the
//! indexable document projected into the search store.

pub mod types;

pub use types::indexable_document::{normalize_document_id, IndexableDocument, METADATA_FIELD};
pub use types::raw_event::{After, AfterValue, Operation, RawEvent};
pub use types::resource::ResourceType;
