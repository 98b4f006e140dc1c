//! Indexing pipeline: projects claimed change events into the document store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use cdc_indexer_repository::{DeleteDocumentRequest, SearchIndexProvider};
use cdc_indexer_shared::RawEvent;

use crate::errors::IngestError;
use crate::loader::BufferedIndexer;
use crate::processor::KeyResolver;
use crate::queue::{Dequeuer, MessageHandler};

/// Running counters of the indexing handler.
#[derive(Debug, Default)]
pub struct IndexingStats {
    events_received: AtomicU64,
    documents_buffered: AtomicU64,
    documents_deleted: AtomicU64,
    events_skipped: AtomicU64,
    events_failed: AtomicU64,
}

/// Point-in-time copy of [`IndexingStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexingProgress {
    pub events_received: u64,
    pub documents_buffered: u64,
    pub documents_deleted: u64,
    pub events_skipped: u64,
    pub events_failed: u64,
}

impl IndexingProgress {
    /// Events that were handled without error.
    pub fn handled(&self) -> u64 {
        self.documents_buffered + self.documents_deleted + self.events_skipped
    }
}

impl IndexingStats {
    pub fn snapshot(&self) -> IndexingProgress {
        IndexingProgress {
            events_received: self.events_received.load(Ordering::Relaxed),
            documents_buffered: self.documents_buffered.load(Ordering::Relaxed),
            documents_deleted: self.documents_deleted.load(Ordering::Relaxed),
            events_skipped: self.events_skipped.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
        }
    }
}

/// Message handler turning one change event into a store operation.
///
/// Deletes go straight to the store; every other document is buffered.
pub struct IndexingHandler {
    resolver: KeyResolver,
    provider: Arc<dyn SearchIndexProvider>,
    indexer: Arc<BufferedIndexer>,
    stats: Arc<IndexingStats>,
}

impl IndexingHandler {
    pub fn new(provider: Arc<dyn SearchIndexProvider>, indexer: Arc<BufferedIndexer>) -> Self {
        Self {
            resolver: KeyResolver::new(),
            provider,
            indexer,
            stats: Arc::new(IndexingStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<IndexingStats> {
        Arc::clone(&self.stats)
    }

    fn failed(&self, error: impl Into<IngestError>) -> IngestError {
        self.stats.events_failed.fetch_add(1, Ordering::Relaxed);
        error.into()
    }
}

#[async_trait]
impl MessageHandler for IndexingHandler {
    async fn handle(&self, payload: &[u8]) -> Result<(), IngestError> {
        self.stats.events_received.fetch_add(1, Ordering::Relaxed);

        let event: RawEvent = serde_json::from_slice(payload).map_err(|e| {
            error!(error = %e, "Failed to decode event");
            self.failed(e)
        })?;

        let doc = match self.resolver.resolve(&event) {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                debug!(op = %event.op, "Skipping event without after state");
                self.stats.events_skipped.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            Err(e) => {
                error!(op = %event.op, error = %e, "Failed to resolve event");
                return Err(self.failed(e));
            }
        };

        if doc.should_delete {
            let request = DeleteDocumentRequest::from(&doc);
            self.provider
                .delete_document(&request)
                .await
                .map_err(|e| {
                    error!(
                        doc_id = %request.id,
                        index = %request.index,
                        error = %e,
                        "Failed to delete document"
                    );
                    self.failed(e)
                })?;
            self.stats.documents_deleted.fetch_add(1, Ordering::Relaxed);
            debug!(doc_id = %request.id, index = %request.index, "Deleted document");
            return Ok(());
        }

        let (doc_id, index) = (doc.id.clone(), doc.index.clone());
        self.indexer.append(doc).await.map_err(|e| {
            error!(doc_id = %doc_id, index = %index, error = %e, "Failed to buffer document");
            self.failed(e)
        })?;
        self.stats.documents_buffered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Configuration for the indexing pipeline.
#[derive(Debug, Clone)]
pub struct IndexingConfig {
    /// Topic the change events are claimed from.
    pub topic: String,
    /// Pause before a terminated claim loop is restarted.
    pub restart_backoff: Duration,
    /// Consecutive unproductive sessions tolerated before giving up.
    pub max_restarts: u32,
    /// Interval of the progress log.
    pub progress_interval: Duration,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            topic: "cdc.events".to_string(),
            restart_backoff: Duration::from_secs(1),
            max_restarts: 5,
            progress_interval: Duration::from_secs(10),
        }
    }
}

/// Drives the claim loop of the indexing handler until shutdown.
pub struct IndexingPipeline {
    dequeuer: Arc<dyn Dequeuer>,
    handler: Arc<IndexingHandler>,
    indexer: Arc<BufferedIndexer>,
    config: IndexingConfig,
}

impl IndexingPipeline {
    pub fn new(
        dequeuer: Arc<dyn Dequeuer>,
        handler: Arc<IndexingHandler>,
        indexer: Arc<BufferedIndexer>,
        config: IndexingConfig,
    ) -> Self {
        Self {
            dequeuer,
            handler,
            indexer,
            config,
        }
    }

    /// Claim and index events until shutdown, then flush the buffer.
    ///
    /// A claim loop that ends without shutdown, by a handler failure, a
    /// handler panic or the end of the stream, is restarted after
    /// `restart_backoff`. Once `max_restarts` consecutive sessions handled no
    /// event successfully, the last error is returned.
    #[instrument(skip(self, shutdown), fields(topic = %self.config.topic))]
    pub async fn run(
        &self,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<IndexingProgress, IngestError> {
        info!("Ready to index events");

        let stats = self.handler.stats();
        let mut progress_timer = interval(self.config.progress_interval);
        progress_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Skip the first tick immediately
        progress_timer.tick().await;
        let mut reporter = ProgressReporter::new(stats.snapshot());

        let mut unproductive_sessions: u32 = 0;
        let result = loop {
            let handled_before = stats.snapshot().handled();
            let handler: Arc<dyn MessageHandler> = self.handler.clone();
            let session = self
                .dequeuer
                .dequeue(&self.config.topic, handler, shutdown.resubscribe());
            tokio::pin!(session);

            let outcome = loop {
                tokio::select! {
                    outcome = &mut session => break outcome,
                    _ = progress_timer.tick() => reporter.log(stats.snapshot()),
                }
            };

            if shutdown_requested(&mut shutdown) {
                break outcome;
            }

            if stats.snapshot().handled() > handled_before {
                unproductive_sessions = 0;
            } else {
                unproductive_sessions += 1;
            }

            match &outcome {
                Ok(()) => warn!("Claim loop ended without shutdown"),
                Err(e) => error!(error = %e, "Claim loop failed"),
            }

            if unproductive_sessions > self.config.max_restarts {
                error!(
                    sessions = unproductive_sessions,
                    "Giving up after repeated claim loop failures"
                );
                break outcome;
            }

            let backoff_ms =
                u64::try_from(self.config.restart_backoff.as_millis()).unwrap_or(u64::MAX);
            info!(
                backoff_ms = backoff_ms,
                attempt = unproductive_sessions,
                "Restarting claim loop"
            );
            tokio::select! {
                _ = shutdown.recv() => break Ok(()),
                _ = sleep(self.config.restart_backoff) => {}
            }
        };

        match self.indexer.close().await {
            Ok(outcome) => debug!(submitted = outcome.submitted, "Final flush completed"),
            Err(e) => error!(error = %e, "Final flush failed"),
        }

        let progress = stats.snapshot();
        info!(
            events = progress.events_received,
            buffered = progress.documents_buffered,
            deleted = progress.documents_deleted,
            skipped = progress.events_skipped,
            failed = progress.events_failed,
            "Indexing stopped"
        );

        result.map(|()| progress)
    }
}

fn shutdown_requested(shutdown: &mut broadcast::Receiver<()>) -> bool {
    !matches!(shutdown.try_recv(), Err(TryRecvError::Empty))
}

/// Logs counters and per-second rates since the previous report.
struct ProgressReporter {
    previous: IndexingProgress,
    previous_at: Instant,
}

impl ProgressReporter {
    fn new(start: IndexingProgress) -> Self {
        Self {
            previous: start,
            previous_at: Instant::now(),
        }
    }

    fn log(&mut self, current: IndexingProgress) {
        let now = Instant::now();
        let elapsed_secs = now.duration_since(self.previous_at).as_secs_f64();
        let rate = |current: u64, previous: u64| {
            if elapsed_secs > 0.0 {
                current.saturating_sub(previous) as f64 / elapsed_secs
            } else {
                0.0
            }
        };

        info!(
            total_events = current.events_received,
            total_buffered = current.documents_buffered,
            total_deleted = current.documents_deleted,
            total_failed = current.events_failed,
            events_per_sec = format!(
                "{:.1}",
                rate(current.events_received, self.previous.events_received)
            ),
            documents_per_sec = format!(
                "{:.1}",
                rate(
                    current.documents_buffered + current.documents_deleted,
                    self.previous.documents_buffered + self.previous.documents_deleted
                )
            ),
            "Progress"
        );

        self.previous = current;
        self.previous_at = now;
    }
}
