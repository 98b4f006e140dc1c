//! Configuration and dependency initialization.

mod dependencies;
mod settings;

pub use dependencies::Dependencies;
pub use settings::{ConnectionMode, IngestSettings, OpenSearchSettings, Settings};

/// Pipeline the binary runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RunMode {
    /// Publish change events from the source file to Kafka.
    Ingest,
    /// Consume change events from Kafka and index them into OpenSearch.
    Index,
}
