//! Kafka producer adapter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::errors::IngestError;
use crate::queue::{Enqueuer, KafkaConfig, ProducerMode};

/// How long a publish may wait for room in the local producer queue.
const QUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `close` waits for outstanding deliveries.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Kafka enqueuer backed by an rdkafka `FutureProducer`.
pub struct KafkaEnqueuer {
    producer: FutureProducer,
    config: KafkaConfig,
    delivery_errors_tx: Mutex<Option<mpsc::UnboundedSender<IngestError>>>,
    delivery_errors_rx: Mutex<Option<mpsc::UnboundedReceiver<IngestError>>>,
    closed: AtomicBool,
}

impl KafkaEnqueuer {
    /// Create a new Kafka enqueuer.
    ///
    /// # Arguments
    ///
    /// * `config` - Broker, retry and delivery mode settings
    ///
    /// # Returns
    ///
    /// * `Ok(KafkaEnqueuer)` - A new enqueuer instance
    /// * `Err(IngestError)` - If producer creation fails
    pub fn new(config: &KafkaConfig) -> Result<Self, IngestError> {
        let producer: FutureProducer = config.producer_config().create()?;
        let (tx, rx) = mpsc::unbounded_channel();

        info!(
            brokers = %config.bootstrap_servers(),
            mode = %config.producer_mode,
            retry_max = config.retry_max,
            "Created Kafka producer"
        );

        Ok(Self {
            producer,
            config: config.clone(),
            delivery_errors_tx: Mutex::new(Some(tx)),
            delivery_errors_rx: Mutex::new(Some(rx)),
            closed: AtomicBool::new(false),
        })
    }

    /// Create `topic` with the configured partition count unless it exists.
    #[instrument(skip(self))]
    pub async fn ensure_topic(&self, topic: &str) -> Result<(), IngestError> {
        let admin: AdminClient<DefaultClientContext> = self.config.client_config().create()?;
        let new_topic = NewTopic::new(
            topic,
            self.config.topic_partitions,
            TopicReplication::Fixed(1),
        );

        let results = admin
            .create_topics(&[new_topic], &AdminOptions::new())
            .await?;

        for result in results {
            match result {
                Ok(name) => info!(
                    topic = %name,
                    partitions = self.config.topic_partitions,
                    "Created topic"
                ),
                Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    debug!(topic = %name, "Topic already exists")
                }
                Err((name, code)) => {
                    return Err(IngestError::kafka(format!(
                        "Creating topic {} failed: {}",
                        name, code
                    )))
                }
            }
        }
        Ok(())
    }

    /// Fetch cluster metadata to check that the brokers are reachable.
    ///
    /// # Returns
    ///
    /// * `Ok(usize)` - Number of brokers in the cluster metadata
    /// * `Err(IngestError)` - If no broker answered within `timeout`
    pub async fn connect(&self, timeout: Duration) -> Result<usize, IngestError> {
        let producer = self.producer.clone();
        let brokers = tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(None, timeout)
                .map(|metadata| metadata.brokers().len())
        })
        .await
        .map_err(|e| IngestError::kafka(format!("Metadata fetch task failed: {}", e)))??;

        info!(brokers = brokers, "Kafka producer connected");
        Ok(brokers)
    }

    fn delivery_sender(&self) -> Option<mpsc::UnboundedSender<IngestError>> {
        self.delivery_errors_tx
            .lock()
            .ok()
            .and_then(|tx| tx.as_ref().cloned())
    }
}

#[async_trait]
impl Enqueuer for KafkaEnqueuer {
    async fn enqueue(&self, topic: &str, payload: &[u8]) -> Result<(), IngestError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IngestError::Closed("kafka enqueuer"));
        }

        let record = FutureRecord::<(), [u8]>::to(topic).payload(payload);

        match self.config.producer_mode {
            ProducerMode::Sync => {
                let (partition, offset) = self
                    .producer
                    .send(record, Timeout::After(QUEUE_TIMEOUT))
                    .await
                    .map_err(|(e, _)| IngestError::kafka(e.to_string()))?;
                debug!(topic = %topic, partition = partition, offset = offset, "Message delivered");
            }
            ProducerMode::Async => {
                let delivery = self
                    .producer
                    .send_result(record)
                    .map_err(|(e, _)| IngestError::kafka(e.to_string()))?;

                let errors = self.delivery_sender();
                let topic = topic.to_string();
                tokio::spawn(async move {
                    let failure = match delivery.await {
                        Ok(Ok(_)) => None,
                        Ok(Err((e, _))) => Some(IngestError::kafka(format!(
                            "Delivery to {} failed: {}",
                            topic, e
                        ))),
                        Err(_) => Some(IngestError::kafka(format!(
                            "Delivery to {} was canceled",
                            topic
                        ))),
                    };
                    if let (Some(failure), Some(errors)) = (failure, errors) {
                        let _ = errors.send(failure);
                    }
                });
            }
        }
        Ok(())
    }

    fn take_delivery_errors(&self) -> Option<mpsc::UnboundedReceiver<IngestError>> {
        if self.config.producer_mode != ProducerMode::Async {
            return None;
        }
        self.delivery_errors_rx.lock().ok().and_then(|mut rx| rx.take())
    }

    async fn close(&self) -> Result<(), IngestError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let producer = self.producer.clone();
        let flushed =
            tokio::task::spawn_blocking(move || producer.flush(Timeout::After(FLUSH_TIMEOUT)))
                .await
                .map_err(|e| IngestError::kafka(format!("Producer flush task failed: {}", e)))?;

        // Dropping the sender ends the delivery-error channel once in-flight
        // deliveries have reported.
        if let Ok(mut tx) = self.delivery_errors_tx.lock() {
            tx.take();
        }

        if let Err(e) = flushed {
            warn!(error = %e, "Producer flush did not complete");
            return Err(e.into());
        }

        info!("Kafka producer closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable() -> KafkaConfig {
        KafkaConfig {
            brokers: vec!["127.0.0.1:1".to_string()],
            ..KafkaConfig::default()
        }
    }

    #[tokio::test]
    async fn test_connect_fails_without_broker() {
        let enqueuer = KafkaEnqueuer::new(&unreachable()).unwrap();

        let result = enqueuer.connect(Duration::from_millis(500)).await;
        assert!(matches!(result, Err(IngestError::KafkaError(_))));
    }

    #[tokio::test]
    async fn test_sync_mode_has_no_delivery_channel() {
        let enqueuer = KafkaEnqueuer::new(&unreachable()).unwrap();
        assert!(enqueuer.take_delivery_errors().is_none());

        let async_enqueuer = KafkaEnqueuer::new(&KafkaConfig {
            producer_mode: ProducerMode::Async,
            ..unreachable()
        })
        .unwrap();
        assert!(async_enqueuer.take_delivery_errors().is_some());
        assert!(async_enqueuer.take_delivery_errors().is_none());
    }
}
