//! Ingestion pipeline: publishes change events from a line-delimited source.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use cdc_indexer_shared::RawEvent;

use crate::errors::IngestError;
use crate::queue::{Enqueuer, ProducerMode};

/// Configuration for the ingestion pipeline.
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Topic every event is published to.
    pub topic: String,
    /// Pause between publishes in sync producer mode.
    pub publish_delay: Duration,
    pub producer_mode: ProducerMode,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            topic: "cdc.events".to_string(),
            publish_delay: Duration::from_millis(100),
            producer_mode: ProducerMode::Sync,
        }
    }
}

/// Counters of one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionReport {
    /// Non-blank lines read from the source.
    pub read: u64,
    /// Events handed to the enqueuer.
    pub enqueued: u64,
    /// Lines that did not decode as an event.
    pub decode_skipped: u64,
    /// Events whose timestamp lies in the future.
    pub future_skipped: u64,
    /// Events the enqueuer rejected.
    pub failed: u64,
}

/// Reads events from a source and publishes them to the queue.
pub struct IngestionPipeline {
    enqueuer: Arc<dyn Enqueuer>,
    config: IngestionConfig,
}

impl IngestionPipeline {
    pub fn new(enqueuer: Arc<dyn Enqueuer>, config: IngestionConfig) -> Self {
        Self { enqueuer, config }
    }

    /// Publish every valid event of `source`, in order.
    ///
    /// Each valid line is published as its exact bytes. Undecodable lines and
    /// future-dated events are logged and skipped; a failed publish is logged
    /// and counted without stopping the run.
    ///
    /// # Returns
    ///
    /// * `Ok(IngestionReport)` - When the source is exhausted or shutdown was signalled
    /// * `Err(IngestError)` - If reading the source fails at the I/O level
    #[instrument(skip(self, source, shutdown), fields(topic = %self.config.topic))]
    pub async fn run<R>(
        &self,
        source: R,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<IngestionReport, IngestError>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        info!(mode = %self.config.producer_mode, "Starting ingestion");

        if let Some(errors) = self.enqueuer.take_delivery_errors() {
            tokio::spawn(drain_delivery_errors(errors, shutdown.resubscribe()));
        }

        let mut lines = source.split(b'\n');
        let mut report = IngestionReport::default();
        let mut line_number: u64 = 0;

        loop {
            let line = tokio::select! {
                _ = shutdown.recv() => {
                    info!("Ingestion interrupted by shutdown");
                    break;
                }
                line = lines.next_segment() => line?,
            };
            let Some(mut line) = line else {
                break;
            };
            line_number += 1;

            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            report.read += 1;

            // Lines that are not UTF-8 fail here like any other malformed JSON
            let event: RawEvent = match serde_json::from_slice(&line) {
                Ok(event) => event,
                Err(e) => {
                    warn!(line = line_number, error = %e, "Skipping undecodable event");
                    report.decode_skipped += 1;
                    continue;
                }
            };

            if event.is_from_future(Utc::now()) {
                warn!(
                    line = line_number,
                    ts_ms = event.timestamp_millis,
                    "Skipping event dated in the future"
                );
                report.future_skipped += 1;
                continue;
            }

            match self.enqueuer.enqueue(&self.config.topic, &line).await {
                Ok(()) => {
                    report.enqueued += 1;
                    debug!(line = line_number, "Enqueued event");
                }
                Err(e) => {
                    error!(line = line_number, error = %e, "Failed to enqueue event");
                    report.failed += 1;
                }
            }

            let paced = self.config.producer_mode == ProducerMode::Sync;
            if paced && !self.config.publish_delay.is_zero() {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("Ingestion interrupted by shutdown");
                        break;
                    }
                    _ = sleep(self.config.publish_delay) => {}
                }
            }
        }

        info!(
            read = report.read,
            enqueued = report.enqueued,
            decode_skipped = report.decode_skipped,
            future_skipped = report.future_skipped,
            failed = report.failed,
            "Ingestion completed"
        );
        Ok(report)
    }
}

/// Log asynchronous delivery failures until shutdown or until the channel closes.
async fn drain_delivery_errors(
    mut errors: mpsc::UnboundedReceiver<IngestError>,
    mut shutdown: broadcast::Receiver<()>,
) -> u64 {
    let mut count = 0;
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            error = errors.recv() => match error {
                Some(e) => {
                    error!(error = %e, "Asynchronous delivery failed");
                    count += 1;
                }
                None => break,
            },
        }
    }
    debug!(count = count, "Delivery error drain stopped");
    count
}
