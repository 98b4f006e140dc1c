//! Processor module for the CDC indexer.
//!
//! Resolves raw change events into indexable documents.

mod key_resolver;

pub use key_resolver::{KeyResolver, ResolveError, MIN_KEY_SEGMENTS};
