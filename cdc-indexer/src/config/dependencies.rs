//! Dependency initialization and wiring for the CDC indexer.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::{ConnectionMode, OpenSearchSettings, RunMode, Settings};
use crate::loader::BufferedIndexer;
use crate::orchestrator::{
    IndexingHandler, IndexingPipeline, IngestionPipeline, Orchestrator, Pipeline,
};
use crate::queue::{KafkaDequeuer, KafkaEnqueuer};
use crate::IndexingError;
use cdc_indexer_repository::opensearch::IndexConfig;
use cdc_indexer_repository::{OpenSearchProvider, SearchIndexError, SearchIndexProvider};

/// How long startup waits for a Kafka broker to answer.
const BROKER_TIMEOUT: Duration = Duration::from_secs(10);

/// Container for all initialized dependencies.
pub struct Dependencies {
    /// The configured orchestrator ready to run.
    pub orchestrator: Orchestrator,
}

impl Dependencies {
    /// Wire the pipeline selected by `mode`.
    ///
    /// # Arguments
    ///
    /// * `settings` - Loaded runtime settings
    /// * `mode` - Pipeline to run
    /// * `source` - Event source overriding `INGEST_SOURCE_PATH`
    ///
    /// # Returns
    ///
    /// * `Ok(Dependencies)` - Initialized dependencies
    /// * `Err(IndexingError)` - If a client cannot be created, no Kafka broker
    ///   answers, or OpenSearch is unreachable in fail-fast mode
    pub async fn new(
        settings: &Settings,
        mode: RunMode,
        source: Option<PathBuf>,
    ) -> Result<Self, IndexingError> {
        info!(
            mode = ?mode,
            kafka_brokers = %settings.kafka.bootstrap_servers(),
            topic = %settings.kafka.topic,
            "Initializing dependencies"
        );

        let pipeline = match mode {
            RunMode::Ingest => Self::ingestion(settings, source).await?,
            RunMode::Index => Self::indexing(settings).await?,
        };

        Ok(Self {
            orchestrator: Orchestrator::new(pipeline),
        })
    }

    async fn ingestion(
        settings: &Settings,
        source: Option<PathBuf>,
    ) -> Result<Pipeline, IndexingError> {
        let enqueuer = KafkaEnqueuer::new(&settings.kafka).map_err(|e| {
            IndexingError::config(format!("Failed to create Kafka producer: {}", e))
        })?;
        enqueuer.connect(BROKER_TIMEOUT).await.map_err(|e| {
            IndexingError::config(format!("Failed to connect to Kafka brokers: {}", e))
        })?;

        // Brokers with topic auto-creation still accept the publishes
        if let Err(e) = enqueuer.ensure_topic(&settings.kafka.topic).await {
            warn!(topic = %settings.kafka.topic, error = %e, "Could not ensure topic exists");
        }

        let enqueuer = Arc::new(enqueuer);
        Ok(Pipeline::Ingest {
            pipeline: IngestionPipeline::new(enqueuer.clone(), settings.ingestion_config()),
            enqueuer,
            source: source.unwrap_or_else(|| settings.ingest.source_path.clone()),
        })
    }

    async fn indexing(settings: &Settings) -> Result<Pipeline, IndexingError> {
        let provider: Arc<dyn SearchIndexProvider> =
            Arc::new(Self::connect_to_opensearch(&settings.opensearch).await?);
        info!("OpenSearch connection established");

        let indexer = Arc::new(BufferedIndexer::new(
            Arc::clone(&provider),
            settings.loader.clone(),
        ));
        let handler = Arc::new(IndexingHandler::new(provider, Arc::clone(&indexer)));
        let dequeuer = KafkaDequeuer::new(&settings.kafka);
        dequeuer
            .connect(&settings.kafka.topic, BROKER_TIMEOUT)
            .await
            .map_err(|e| {
                IndexingError::config(format!("Failed to connect to Kafka brokers: {}", e))
            })?;
        let dequeuer = Arc::new(dequeuer);

        Ok(Pipeline::Index {
            pipeline: IndexingPipeline::new(
                dequeuer.clone(),
                handler,
                indexer,
                settings.indexing_config(),
            ),
            dequeuer,
        })
    }

    /// Connect to OpenSearch and create missing indices, retrying per connection mode.
    async fn connect_to_opensearch(
        settings: &OpenSearchSettings,
    ) -> Result<OpenSearchProvider, IndexingError> {
        loop {
            match Self::try_connect_opensearch(settings).await {
                Ok(provider) => return Ok(provider),
                Err(e) if !e.is_transient() => {
                    return Err(IndexingError::config(format!(
                        "Failed to initialize OpenSearch: {}",
                        e
                    )));
                }
                Err(e) => match settings.connection_mode {
                    ConnectionMode::FailFast => {
                        return Err(IndexingError::config(format!(
                            "Failed to connect to OpenSearch: {}",
                            e
                        )));
                    }
                    ConnectionMode::Retry => {
                        warn!(
                            opensearch_urls = ?settings.urls,
                            error = %e,
                            retry_interval_secs = settings.retry_interval.as_secs(),
                            "Failed to connect to OpenSearch, retrying..."
                        );
                        sleep(settings.retry_interval.max(Duration::from_millis(100))).await;
                    }
                },
            }
        }
    }

    /// Attempt to connect to OpenSearch and ensure every resource index exists.
    async fn try_connect_opensearch(
        settings: &OpenSearchSettings,
    ) -> Result<OpenSearchProvider, SearchIndexError> {
        let provider =
            OpenSearchProvider::new(&settings.urls, IndexConfig::new(settings.max_retries)).await?;
        provider.ensure_index_exists().await?;
        Ok(provider)
    }
}
