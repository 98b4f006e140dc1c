//! Interface definitions for the document store.
//!
//! This module defines the abstract `SearchIndexProvider` trait that allows
//! for dependency injection and swappable store implementations.

mod search_index_provider;

pub use search_index_provider::SearchIndexProvider;
