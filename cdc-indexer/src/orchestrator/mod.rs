//! Orchestrator module for the CDC indexer.
//!
//! Runs one of the two pipelines and turns Ctrl-C into a shutdown signal.

mod indexing;
mod ingestion;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::BufReader;
use tokio::sync::broadcast;
use tracing::{error, info, instrument};

use crate::errors::IngestError;
use crate::queue::{Dequeuer, Enqueuer};

pub use indexing::{
    IndexingConfig, IndexingHandler, IndexingPipeline, IndexingProgress, IndexingStats,
};
pub use ingestion::{IngestionConfig, IngestionPipeline, IngestionReport};

/// A pipeline together with the queue endpoint it owns.
pub enum Pipeline {
    /// Publish the events of `source`.
    Ingest {
        pipeline: IngestionPipeline,
        enqueuer: Arc<dyn Enqueuer>,
        source: PathBuf,
    },
    /// Claim events and index them.
    Index {
        pipeline: IndexingPipeline,
        dequeuer: Arc<dyn Dequeuer>,
    },
}

/// Orchestrator that runs a pipeline until it finishes or shutdown is signalled.
pub struct Orchestrator {
    pipeline: Pipeline,
    shutdown_tx: broadcast::Sender<()>,
}

impl Orchestrator {
    pub fn new(pipeline: Pipeline) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            pipeline,
            shutdown_tx,
        }
    }

    /// Run the pipeline.
    ///
    /// The queue endpoint is closed once the pipeline has stopped.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), IngestError> {
        let shutdown_rx = self.shutdown_tx.subscribe();
        let signal_tx = self.shutdown_tx.clone();
        let signal = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal");
                let _ = signal_tx.send(());
            }
        });

        let result = match &self.pipeline {
            Pipeline::Ingest {
                pipeline,
                enqueuer,
                source,
            } => {
                info!(source = %source.display(), "Starting ingestion pipeline");
                let result = match File::open(source).await {
                    Ok(file) => pipeline
                        .run(BufReader::new(file), shutdown_rx)
                        .await
                        .map(|_| ()),
                    Err(e) => {
                        error!(
                            source = %source.display(),
                            error = %e,
                            "Failed to open event source"
                        );
                        Err(e.into())
                    }
                };
                close_endpoint(enqueuer.close().await, "enqueuer");
                result
            }
            Pipeline::Index { pipeline, dequeuer } => {
                info!("Starting indexing pipeline");
                let result = pipeline.run(shutdown_rx).await.map(|_| ());
                close_endpoint(dequeuer.close().await, "dequeuer");
                result
            }
        };

        signal.abort();
        result
    }
}

fn close_endpoint(result: Result<(), IngestError>, endpoint: &'static str) {
    match result {
        Ok(()) => info!(endpoint = endpoint, "Queue endpoint closed"),
        Err(e) => error!(endpoint = endpoint, error = %e, "Failed to close queue endpoint"),
    }
}
