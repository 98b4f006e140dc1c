//! Loader module for the CDC indexer.
//!
//! Buffers indexable documents and writes them to the document store as
//! bulk requests, on a timer or when the buffer fills up.

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::errors::IngestError;
use cdc_indexer_repository::{BulkAction, SearchIndexProvider};
use cdc_indexer_shared::IndexableDocument;

/// Configuration for the buffered indexer.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Number of buffered documents that triggers a flush.
    pub buffer_size: usize,
    /// Interval of the periodic flush.
    pub flush_interval: Duration,
    /// Bulk attempts a document gets before it is dropped.
    pub max_flush_attempts: u32,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            buffer_size: 100,
            flush_interval: Duration::from_secs(5),
            max_flush_attempts: 3,
        }
    }
}

/// What a single flush did with the buffered documents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Documents sent in the bulk request.
    pub submitted: usize,
    /// Documents skipped because they had no body.
    pub skipped: usize,
    /// Documents the bulk request failed for.
    pub failed: usize,
    /// Failed documents kept in the buffer for the next flush.
    pub retained: usize,
    /// Failed documents that ran out of attempts.
    pub dropped: usize,
}

#[derive(Debug)]
struct PendingDocument {
    doc: IndexableDocument,
    attempts: u32,
}

struct BufferState {
    provider: Arc<dyn SearchIndexProvider>,
    config: LoaderConfig,
    buffer: Mutex<Vec<PendingDocument>>,
    flush_requested: Notify,
    closed: AtomicBool,
}

/// Buffered bulk writer in front of the document store.
///
/// The indexer:
/// - Accepts documents from any number of concurrent producers
/// - Flushes them as one bulk request every `flush_interval`, or as soon as
///   `buffer_size` documents are waiting
/// - Serializes every flush through the buffer lock, so at most one bulk
///   request is in flight
/// - Keeps documents of a failed flush for the next one
pub struct BufferedIndexer {
    state: Arc<BufferState>,
    shutdown_tx: broadcast::Sender<()>,
    flush_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl BufferedIndexer {
    /// Create a buffered indexer and start its flush task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(provider: Arc<dyn SearchIndexProvider>, config: LoaderConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let state = Arc::new(BufferState {
            provider,
            buffer: Mutex::new(Vec::with_capacity(config.buffer_size)),
            config,
            flush_requested: Notify::new(),
            closed: AtomicBool::new(false),
        });

        let flush_task = tokio::spawn(run_flush_task(Arc::clone(&state), shutdown_rx));

        let flush_interval_ms =
            u64::try_from(state.config.flush_interval.as_millis()).unwrap_or(u64::MAX);
        info!(
            buffer_size = state.config.buffer_size,
            flush_interval_ms = flush_interval_ms,
            max_flush_attempts = state.config.max_flush_attempts,
            "Started buffered indexer"
        );

        Self {
            state,
            shutdown_tx,
            flush_task: std::sync::Mutex::new(Some(flush_task)),
        }
    }

    /// Add a document to the buffer.
    ///
    /// Never waits on the network; it only waits for the buffer lock, which
    /// an in-flight flush holds until its bulk request completes.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The document will be part of the next flush
    /// * `Err(IngestError::Closed)` - If the indexer has been closed
    pub async fn append(&self, doc: IndexableDocument) -> Result<(), IngestError> {
        let buffered = {
            let mut buffer = self.state.buffer.lock().await;
            if self.state.closed.load(Ordering::Acquire) {
                return Err(IngestError::Closed("buffered indexer"));
            }
            buffer.push(PendingDocument { doc, attempts: 0 });
            buffer.len()
        };

        if buffered >= self.state.config.buffer_size {
            self.state.flush_requested.notify_one();
        }
        Ok(())
    }

    /// Flush all buffered documents now.
    ///
    /// Flushing an empty buffer is a no-op and issues no request.
    pub async fn flush(&self) -> Result<FlushOutcome, IngestError> {
        self.state.flush().await
    }

    /// Number of documents waiting for a flush.
    pub async fn len(&self) -> usize {
        self.state.buffer.lock().await.len()
    }

    /// Whether no document is waiting for a flush.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stop accepting documents, stop the flush task and flush what is left.
    ///
    /// An in-flight flush completes before the task stops. Closing twice is a no-op.
    pub async fn close(&self) -> Result<FlushOutcome, IngestError> {
        {
            let _buffer = self.state.buffer.lock().await;
            if self.state.closed.swap(true, Ordering::AcqRel) {
                return Ok(FlushOutcome::default());
            }
        }

        let _ = self.shutdown_tx.send(());
        let handle = self
            .flush_task
            .lock()
            .map_err(|e| IngestError::loader(format!("Flush task handle poisoned: {}", e)))?
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Flush task ended abnormally");
            }
        }

        let outcome = self.state.flush().await?;
        info!(
            submitted = outcome.submitted,
            skipped = outcome.skipped,
            "Buffered indexer closed"
        );
        Ok(outcome)
    }
}

impl Drop for BufferedIndexer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Ok(buffer) = self.state.buffer.try_lock() {
            if !buffer.is_empty() {
                warn!(
                    pending = buffer.len(),
                    "Buffered indexer dropped with unflushed documents"
                );
            }
        }
    }
}

impl BufferState {
    #[instrument(skip(self))]
    async fn flush(&self) -> Result<FlushOutcome, IngestError> {
        let mut buffer = self.buffer.lock().await;
        if buffer.is_empty() {
            return Ok(FlushOutcome::default());
        }

        let pending = mem::replace(&mut *buffer, Vec::with_capacity(self.config.buffer_size));
        let mut outcome = FlushOutcome::default();
        let mut batch = Vec::with_capacity(pending.len());
        let mut actions = Vec::with_capacity(pending.len());

        for mut entry in pending {
            if !entry.doc.should_delete && !entry.doc.has_body() {
                warn!(
                    doc_id = %entry.doc.id,
                    index = %entry.doc.index,
                    "Skipping document with empty data"
                );
                outcome.skipped += 1;
                continue;
            }
            entry.attempts += 1;
            actions.push(BulkAction::from(&entry.doc));
            batch.push(entry);
        }

        outcome.submitted = actions.len();
        if actions.is_empty() {
            return Ok(outcome);
        }

        debug!(count = actions.len(), "Flushing documents to search index");

        let (failed, message) = match self.provider.bulk(&actions).await {
            Ok(summary) if summary.results.len() != batch.len() => {
                error!(
                    expected = batch.len(),
                    received = summary.results.len(),
                    "Bulk response does not match the request"
                );
                let message = format!(
                    "bulk response reported {} results for {} documents",
                    summary.results.len(),
                    batch.len()
                );
                (batch, message)
            }
            Ok(summary) if !summary.has_failures() => {
                debug!(count = summary.succeeded, "Successfully indexed all documents");
                return Ok(outcome);
            }
            Ok(summary) => {
                warn!(
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    "Bulk request completed with some failures"
                );
                let mut failed = Vec::with_capacity(summary.failed);
                for (entry, result) in batch.into_iter().zip(&summary.results) {
                    if result.success {
                        continue;
                    }
                    if let Some(ref err) = result.error {
                        error!(
                            doc_id = %result.id,
                            index = %result.index,
                            error = %err,
                            "Failed to index document"
                        );
                    }
                    failed.push(entry);
                }
                let message = format!(
                    "{} of {} documents failed",
                    summary.failed, summary.total
                );
                (failed, message)
            }
            Err(e) => {
                error!(error = %e, count = batch.len(), "Failed to bulk index documents");
                (batch, e.to_string())
            }
        };

        outcome.failed = failed.len();
        let mut retained = Vec::with_capacity(failed.len() + buffer.len());
        for entry in failed {
            if entry.attempts >= self.config.max_flush_attempts {
                error!(
                    doc_id = %entry.doc.id,
                    index = %entry.doc.index,
                    attempts = entry.attempts,
                    "Dropping document after exhausting flush attempts"
                );
                outcome.dropped += 1;
            } else {
                retained.push(entry);
            }
        }
        outcome.retained = retained.len();
        retained.append(&mut buffer);
        *buffer = retained;

        Err(IngestError::flush(
            format!("Failed to flush {} documents: {}", outcome.failed, message),
            outcome.failed,
        ))
    }
}

/// Flush on every tick and on every size trigger until shutdown.
async fn run_flush_task(state: Arc<BufferState>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = interval(state.config.flush_interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the first tick immediately
    ticker.tick().await;

    loop {
        let trigger = tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => "interval",
            _ = state.flush_requested.notified() => "size",
        };

        match state.flush().await {
            Ok(outcome) if outcome.submitted > 0 || outcome.skipped > 0 => {
                debug!(
                    trigger = trigger,
                    submitted = outcome.submitted,
                    skipped = outcome.skipped,
                    "Flushed buffer"
                );
            }
            Ok(_) => {}
            Err(e) => {
                error!(trigger = trigger, error = %e, "Periodic flush failed");
            }
        }
    }

    debug!("Flush task stopped");
}
