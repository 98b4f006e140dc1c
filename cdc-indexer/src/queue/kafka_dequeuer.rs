//! Kafka consumer adapter.
//!
//! Claims change events from a topic and marks each one by storing its
//! offset after the handler succeeded. Stored offsets are committed by the
//! client's auto-commit. A message whose handler failed is sought back to,
//! so the next session of the cached consumer claims it again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::Offset;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use crate::errors::IngestError;
use crate::queue::{
    handle_delivery, DeliveryRecord, Dequeuer, Disposition, KafkaConfig, MessageHandler,
};

/// How long a rewind may wait for the fetcher.
const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka dequeuer with one cached `StreamConsumer` per topic.
pub struct KafkaDequeuer {
    config: KafkaConfig,
    consumers: Mutex<HashMap<String, Arc<StreamConsumer>>>,
    closed: AtomicBool,
}

impl KafkaDequeuer {
    /// Create a new Kafka dequeuer.
    ///
    /// Consumers are created lazily, on the first `dequeue` of each topic,
    /// unless [`KafkaDequeuer::connect`] created one up front.
    pub fn new(config: &KafkaConfig) -> Self {
        Self {
            config: config.clone(),
            consumers: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Get the consumer subscribed to `topic`, creating it on first use.
    fn consumer_for(&self, topic: &str) -> Result<Arc<StreamConsumer>, IngestError> {
        let mut consumers = self
            .consumers
            .lock()
            .map_err(|_| IngestError::kafka("Consumer cache lock poisoned"))?;

        if let Some(consumer) = consumers.get(topic) {
            return Ok(Arc::clone(consumer));
        }

        let consumer: StreamConsumer = self.config.consumer_config().create()?;
        consumer.subscribe(&[topic])?;

        info!(
            brokers = %self.config.bootstrap_servers(),
            group_id = %self.config.consumer_group,
            topic = %topic,
            "Created Kafka consumer"
        );

        let consumer = Arc::new(consumer);
        consumers.insert(topic.to_string(), Arc::clone(&consumer));
        Ok(consumer)
    }

    /// Create the consumer of `topic` and fetch its metadata from the brokers.
    ///
    /// # Returns
    ///
    /// * `Ok(usize)` - Number of brokers in the cluster metadata
    /// * `Err(IngestError)` - If no broker answered within `timeout`
    #[instrument(skip(self))]
    pub async fn connect(&self, topic: &str, timeout: Duration) -> Result<usize, IngestError> {
        let consumer = self.consumer_for(topic)?;
        let topic = topic.to_string();
        let brokers = tokio::task::spawn_blocking(move || {
            consumer
                .fetch_metadata(Some(&topic), timeout)
                .map(|metadata| metadata.brokers().len())
        })
        .await
        .map_err(|e| IngestError::kafka(format!("Metadata fetch task failed: {}", e)))??;

        info!(brokers = brokers, "Kafka consumer connected");
        Ok(brokers)
    }

    /// Move the consumer back to an unhandled message.
    ///
    /// When the seek fails the consumer is dropped from the cache; the next
    /// `dequeue` rejoins the group from the committed offsets, which never
    /// include the unhandled message.
    fn rewind(&self, consumer: &StreamConsumer, topic: &str, partition: i32, offset: i64) {
        match consumer.seek(topic, partition, Offset::Offset(offset), SEEK_TIMEOUT) {
            Ok(()) => debug!(
                topic = %topic,
                partition = partition,
                offset = offset,
                "Rewound consumer to unhandled message"
            ),
            Err(e) => {
                warn!(
                    topic = %topic,
                    partition = partition,
                    offset = offset,
                    error = %e,
                    "Seek failed, recreating consumer"
                );
                if let Ok(mut consumers) = self.consumers.lock() {
                    consumers.remove(topic);
                }
            }
        }
    }
}

#[async_trait]
impl Dequeuer for KafkaDequeuer {
    #[instrument(skip(self, handler, shutdown))]
    async fn dequeue(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), IngestError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IngestError::Closed("kafka dequeuer"));
        }

        let consumer = self.consumer_for(topic)?;
        let mut message_stream = consumer.stream();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(topic = %topic, "Consumer received shutdown signal");
                    return Ok(());
                }
                message = message_stream.next() => {
                    match message {
                        Some(Ok(msg)) => {
                            let record = DeliveryRecord {
                                topic: msg.topic(),
                                partition: msg.partition(),
                                offset: msg.offset(),
                                payload: msg.payload().unwrap_or_default(),
                            };
                            debug!(
                                topic = %record.topic,
                                partition = record.partition,
                                offset = record.offset,
                                "Received message from Kafka"
                            );

                            let outcome = handle_delivery(handler.as_ref(), &record).await;
                            match Disposition::from(outcome) {
                                Disposition::Mark => {
                                    consumer.store_offset_from_message(&msg)?;
                                }
                                Disposition::Rewind(result) => {
                                    self.rewind(
                                        &consumer,
                                        record.topic,
                                        record.partition,
                                        record.offset,
                                    );
                                    return result;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            // librdkafka recovers from broker errors on its own
                            error!(topic = %topic, error = %e, "Kafka error");
                        }
                        None => {
                            info!(topic = %topic, "Kafka stream ended");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn close(&self) -> Result<(), IngestError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let consumers: Vec<Arc<StreamConsumer>> = self
            .consumers
            .lock()
            .map_err(|_| IngestError::kafka("Consumer cache lock poisoned"))?
            .drain()
            .map(|(_, consumer)| consumer)
            .collect();

        for consumer in &consumers {
            consumer.unsubscribe();
        }

        info!(count = consumers.len(), "Kafka consumers closed");
        Ok(())
    }
}
