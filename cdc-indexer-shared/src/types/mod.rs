//! This module defines the core data structures and types used across the CDC indexer.
//! It re-exports the event model and the document types.

pub mod indexable_document;
pub mod raw_event;
pub mod resource;

pub use indexable_document::IndexableDocument;
pub use raw_event::RawEvent;
pub use resource::ResourceType;
