//! Error types for the CDC indexer pipelines.

use cdc_indexer_repository::SearchIndexError;
use thiserror::Error;

use crate::processor::ResolveError;

/// Errors that can occur while publishing, consuming, or indexing events.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Error from the loader component.
    #[error("Loader error: {0}")]
    LoaderError(String),

    /// Kafka-related error.
    #[error("Kafka error: {0}")]
    KafkaError(String),

    /// Error parsing or decoding data.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Error reading the event source.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// The event could not be turned into a document.
    #[error("Resolve error: {0}")]
    ResolveError(#[from] ResolveError),

    /// The document store rejected a request.
    #[error("Search index error: {0}")]
    SearchError(#[from] SearchIndexError),

    /// A bulk flush failed as a whole or for some of its documents.
    #[error("Flush error: {message}")]
    FlushError { message: String, failed: usize },

    /// The component has been closed.
    #[error("{0} is closed")]
    Closed(&'static str),

    /// Channel communication error.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl IngestError {
    /// Create a loader error.
    pub fn loader(msg: impl Into<String>) -> Self {
        Self::LoaderError(msg.into())
    }

    /// Create a Kafka error.
    pub fn kafka(msg: impl Into<String>) -> Self {
        Self::KafkaError(msg.into())
    }

    /// Create a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }

    /// Create a flush error covering `failed` documents.
    pub fn flush(msg: impl Into<String>, failed: usize) -> Self {
        Self::FlushError {
            message: msg.into(),
            failed,
        }
    }
}

impl From<rdkafka::error::KafkaError> for IngestError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        Self::KafkaError(err.to_string())
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError(err.to_string())
    }
}
