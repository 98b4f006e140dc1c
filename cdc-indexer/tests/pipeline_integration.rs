//! Integration tests for the ingestion and indexing pipelines.
//!
//! These tests run the real pipelines over the in-memory queue with a mock
//! SearchIndexProvider, so no broker or cluster is needed.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

use cdc_indexer::errors::IngestError;
use cdc_indexer::loader::{BufferedIndexer, LoaderConfig};
use cdc_indexer::orchestrator::{
    IndexingConfig, IndexingHandler, IndexingPipeline, IndexingProgress, IngestionConfig,
    IngestionPipeline,
};
use cdc_indexer::queue::{Enqueuer, MemoryQueue, MessageHandler, ProducerMode};
use cdc_indexer_repository::{
    BatchOperationResult, BatchOperationSummary, BulkAction, DeleteDocumentRequest,
    SearchIndexError, SearchIndexProvider,
};

const TOPIC: &str = "cdc.events";

// Mock SearchIndexProvider for testing
#[derive(Default)]
struct MockSearchProvider {
    bulk_batches: Mutex<Vec<Vec<BulkAction>>>,
    deletes: Mutex<Vec<(String, String)>>,
    delete_failures: Mutex<usize>,
}

impl MockSearchProvider {
    /// Provider rejecting the next `count` deletes.
    fn failing_deletes(count: usize) -> Self {
        Self {
            delete_failures: Mutex::new(count),
            ..Self::default()
        }
    }

    fn indexed(&self) -> Vec<(String, String)> {
        self.bulk_batches
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .map(|a| (a.index().to_string(), a.id().to_string()))
            .collect()
    }

    fn deletes(&self) -> Vec<(String, String)> {
        self.deletes.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchIndexProvider for MockSearchProvider {
    async fn ensure_index_exists(&self) -> Result<(), SearchIndexError> {
        Ok(())
    }

    async fn delete_document(
        &self,
        request: &DeleteDocumentRequest,
    ) -> Result<(), SearchIndexError> {
        self.deletes
            .lock()
            .unwrap()
            .push((request.index.clone(), request.id.clone()));
        let mut failures = self.delete_failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(SearchIndexError::delete("cluster read-only"));
        }
        // Deleting an absent document succeeds, like a 404 from OpenSearch
        Ok(())
    }

    async fn bulk(
        &self,
        actions: &[BulkAction],
    ) -> Result<BatchOperationSummary, SearchIndexError> {
        self.bulk_batches.lock().unwrap().push(actions.to_vec());
        Ok(BatchOperationSummary::from_results(
            actions
                .iter()
                .map(|a| BatchOperationResult {
                    id: a.id().to_string(),
                    index: a.index().to_string(),
                    success: true,
                    status: Some(201),
                    error: None,
                })
                .collect(),
        ))
    }
}

fn event_line(op: &str, key: &str, object: &str, ts_ms: i64) -> String {
    let object: serde_json::Value = serde_json::from_str(object).unwrap();
    serde_json::json!({
        "before": null,
        "after": { "key": key, "value": { "type": 0, "object": object } },
        "op": op,
        "ts_ms": ts_ms,
    })
    .to_string()
}

fn loader_config() -> LoaderConfig {
    LoaderConfig {
        buffer_size: 100,
        flush_interval: Duration::from_secs(60),
        max_flush_attempts: 3,
    }
}

fn indexing_config() -> IndexingConfig {
    IndexingConfig {
        topic: TOPIC.to_string(),
        restart_backoff: Duration::from_millis(10),
        max_restarts: 2,
        progress_interval: Duration::from_secs(10),
    }
}

fn indexing_pipeline(
    queue: Arc<MemoryQueue>,
    provider: Arc<MockSearchProvider>,
) -> IndexingPipeline {
    let indexer = Arc::new(BufferedIndexer::new(provider.clone(), loader_config()));
    let handler = Arc::new(IndexingHandler::new(provider, indexer.clone()));
    IndexingPipeline::new(queue, handler, indexer, indexing_config())
}

/// Run the indexing pipeline until the queue is drained, then shut it down.
async fn index_until_drained(
    queue: Arc<MemoryQueue>,
    provider: Arc<MockSearchProvider>,
) -> Result<IndexingProgress, IngestError> {
    let pipeline = indexing_pipeline(queue.clone(), provider);
    let (tx, rx) = broadcast::channel(1);

    let run = tokio::spawn(async move { pipeline.run(rx).await });
    timeout(Duration::from_secs(5), async {
        while queue.pending(TOPIC) > 0 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("queue was not drained");

    tx.send(()).unwrap();
    run.await.unwrap()
}

#[tokio::test]
async fn test_ingest_then_index() {
    let queue = Arc::new(MemoryQueue::new());
    let provider = Arc::new(MockSearchProvider::default());
    let future = Utc::now().timestamp_millis() + 3_600_000;

    let source = [
        event_line("c", "/t1/x/node/n1", r#"{"id":"node-1","hostname":"dp-1"}"#, 1_000),
        event_line("u", "/t1/x/upstream/u1", r#"{"id":"a/b","name":"backend"}"#, 2_000),
        event_line("d", "/t1/x/service/svc1", "{}", 3_000),
        event_line("c", "/t1/x/node/n2", r#"{"id":"node-2"}"#, future),
        "not json".to_string(),
        r#"{"before":null,"after":null,"op":"u","ts_ms":4000}"#.to_string(),
    ]
    .join("\n");

    let ingestion = IngestionPipeline::new(
        queue.clone(),
        IngestionConfig {
            topic: TOPIC.to_string(),
            publish_delay: Duration::ZERO,
            producer_mode: ProducerMode::Sync,
        },
    );
    let (_tx, rx) = broadcast::channel(1);
    let report = ingestion.run(source.as_bytes(), rx).await.unwrap();

    assert_eq!(report.enqueued, 4);
    assert_eq!(report.future_skipped, 1);
    assert_eq!(report.decode_skipped, 1);

    let progress = index_until_drained(queue.clone(), provider.clone())
        .await
        .unwrap();

    assert_eq!(progress.events_received, 4);
    assert_eq!(progress.documents_buffered, 2);
    assert_eq!(progress.documents_deleted, 1);
    assert_eq!(progress.events_skipped, 1);

    // Deletes bypass the buffer; everything else arrives in one final bulk
    assert_eq!(
        provider.deletes(),
        vec![("kong-services".to_string(), "svc1".to_string())]
    );
    assert_eq!(
        provider.indexed(),
        vec![
            ("kong-nodes".to_string(), "node-1".to_string()),
            ("kong-upstreams".to_string(), "a-b".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_double_delete_is_idempotent() {
    let queue = Arc::new(MemoryQueue::new());
    let provider = Arc::new(MockSearchProvider::default());

    let delete = event_line("d", "/t1/x/service/svc1", "{}", 1_000);
    queue.enqueue(TOPIC, delete.as_bytes()).await.unwrap();
    queue.enqueue(TOPIC, delete.as_bytes()).await.unwrap();

    let progress = index_until_drained(queue.clone(), provider.clone())
        .await
        .unwrap();

    assert_eq!(progress.documents_deleted, 2);
    assert_eq!(progress.events_failed, 0);
    assert_eq!(provider.deletes().len(), 2);
    assert!(provider.indexed().is_empty());
}

#[tokio::test]
async fn test_failed_delete_is_not_committed() {
    let queue = Arc::new(MemoryQueue::new());
    let provider = Arc::new(MockSearchProvider::failing_deletes(usize::MAX));

    let delete = event_line("d", "/t1/x/service/svc1", "{}", 1_000);
    queue.enqueue(TOPIC, delete.as_bytes()).await.unwrap();

    let pipeline = indexing_pipeline(queue.clone(), provider.clone());
    let (_tx, rx) = broadcast::channel(1);
    let result = timeout(Duration::from_secs(5), pipeline.run(rx))
        .await
        .expect("pipeline did not give up");

    assert!(matches!(result, Err(IngestError::SearchError(_))));
    // One initial session plus two restarts
    assert_eq!(provider.deletes().len(), 3);
    assert_eq!(queue.pending(TOPIC), 1);
}

#[tokio::test]
async fn test_failed_delete_is_redelivered_before_later_events() {
    let queue = Arc::new(MemoryQueue::new());
    let provider = Arc::new(MockSearchProvider::failing_deletes(1));

    let delete = event_line("d", "/t1/x/service/svc1", "{}", 1_000);
    let create = event_line("c", "/t1/x/node/n1", r#"{"id":"node-1"}"#, 2_000);
    queue.enqueue(TOPIC, delete.as_bytes()).await.unwrap();
    queue.enqueue(TOPIC, create.as_bytes()).await.unwrap();

    let progress = index_until_drained(queue.clone(), provider.clone())
        .await
        .unwrap();

    let svc1 = ("kong-services".to_string(), "svc1".to_string());
    assert_eq!(provider.deletes(), vec![svc1.clone(), svc1]);
    assert_eq!(progress.documents_deleted, 1);
    assert_eq!(
        provider.indexed(),
        vec![("kong-nodes".to_string(), "node-1".to_string())]
    );
    assert_eq!(queue.pending(TOPIC), 0);
}

#[tokio::test]
async fn test_malformed_key_stops_the_claim_loop() {
    let queue = Arc::new(MemoryQueue::new());
    let provider = Arc::new(MockSearchProvider::default());

    queue
        .enqueue(TOPIC, event_line("c", "t1/node", r#"{"id":"n1"}"#, 1_000).as_bytes())
        .await
        .unwrap();

    let pipeline = indexing_pipeline(queue.clone(), provider.clone());
    let (_tx, rx) = broadcast::channel(1);
    let result = timeout(Duration::from_secs(5), pipeline.run(rx))
        .await
        .expect("pipeline did not give up");

    assert!(matches!(result, Err(IngestError::ResolveError(_))));
    assert_eq!(queue.pending(TOPIC), 1);
    assert!(provider.indexed().is_empty());
}

#[tokio::test]
async fn test_document_without_body_is_not_indexed() {
    let queue = Arc::new(MemoryQueue::new());
    let provider = Arc::new(MockSearchProvider::default());

    queue
        .enqueue(TOPIC, event_line("c", "/t1/x/node/n1", "{}", 1_000).as_bytes())
        .await
        .unwrap();

    let progress = index_until_drained(queue.clone(), provider.clone())
        .await
        .unwrap();

    assert_eq!(progress.documents_buffered, 1);
    assert!(provider.bulk_batches.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_shutdown_flushes_buffered_documents() {
    let provider = Arc::new(MockSearchProvider::default());
    let indexer = Arc::new(BufferedIndexer::new(provider.clone(), loader_config()));
    let handler = IndexingHandler::new(provider.clone(), indexer.clone());

    handler
        .handle(event_line("c", "/t1/x/node/n1", r#"{"id":"n1"}"#, 1_000).as_bytes())
        .await
        .unwrap();
    assert_eq!(indexer.len().await, 1);
    assert!(provider.indexed().is_empty());

    indexer.close().await.unwrap();
    assert_eq!(
        provider.indexed(),
        vec![("kong-nodes".to_string(), "n1".to_string())]
    );
}
