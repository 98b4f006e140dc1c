//! Queue ports for the CDC indexer.
//!
//! The ingestion pipeline publishes through an [`Enqueuer`]; the indexing
//! pipeline claims messages through a [`Dequeuer`] and hands each payload to a
//! [`MessageHandler`]. A message is marked as consumed only once its handler
//! succeeded, so delivery is at least once.

mod kafka_config;
mod kafka_dequeuer;
mod kafka_enqueuer;
mod memory;

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{broadcast, mpsc};
use tracing::error;

use crate::errors::IngestError;

pub use kafka_config::KafkaConfig;
pub use kafka_dequeuer::KafkaDequeuer;
pub use kafka_enqueuer::KafkaEnqueuer;
pub use memory::MemoryQueue;

/// How the producer confirms a publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProducerMode {
    /// Wait for the broker acknowledgement before returning.
    #[default]
    Sync,
    /// Return once queued; failures arrive on the delivery-error channel.
    Async,
}

impl ProducerMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sync" => Some(Self::Sync),
            "async" => Some(Self::Async),
            _ => None,
        }
    }
}

impl fmt::Display for ProducerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync => write!(f, "sync"),
            Self::Async => write!(f, "async"),
        }
    }
}

/// Publishing side of the queue.
#[async_trait]
pub trait Enqueuer: Send + Sync {
    /// Publish `payload` to `topic`.
    async fn enqueue(&self, topic: &str, payload: &[u8]) -> Result<(), IngestError>;

    /// Take the channel carrying asynchronous delivery failures.
    ///
    /// Returns `None` when the enqueuer reports every failure from `enqueue`,
    /// or when the channel has already been taken.
    fn take_delivery_errors(&self) -> Option<mpsc::UnboundedReceiver<IngestError>> {
        None
    }

    /// Flush pending publishes and release the producer.
    async fn close(&self) -> Result<(), IngestError>;
}

/// Processes one claimed message payload.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: &[u8]) -> Result<(), IngestError>;
}

/// Claiming side of the queue.
#[async_trait]
pub trait Dequeuer: Send + Sync {
    /// Claim messages of `topic` and pass them to `handler` until shutdown.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - On shutdown, end of stream, or after a handler panic
    /// * `Err(IngestError)` - The first handler failure
    ///
    /// A message whose handler failed or panicked stays unmarked and is the
    /// first one claimed by the next `dequeue` of the topic.
    async fn dequeue(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), IngestError>;

    /// Release all consumers.
    async fn close(&self) -> Result<(), IngestError>;
}

/// A claimed message together with its position in the topic.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryRecord<'a> {
    pub topic: &'a str,
    pub partition: i32,
    pub offset: i64,
    pub payload: &'a [u8],
}

/// Result of passing one message through its handler.
#[derive(Debug)]
pub enum DeliveryOutcome {
    /// The handler succeeded; the message may be marked.
    Handled,
    /// The handler returned an error.
    Failed(IngestError),
    /// The handler panicked.
    Panicked(String),
}

/// What a claim loop does with a message once its handler ran.
#[derive(Debug)]
pub enum Disposition {
    /// Mark the message and claim the next one.
    Mark,
    /// Leave the message unmarked and move the consumer back to it, then end
    /// the session with the carried result. The next session starts at the
    /// rewound message.
    Rewind(Result<(), IngestError>),
}

impl From<DeliveryOutcome> for Disposition {
    fn from(outcome: DeliveryOutcome) -> Self {
        match outcome {
            DeliveryOutcome::Handled => Self::Mark,
            DeliveryOutcome::Failed(e) => Self::Rewind(Err(e)),
            DeliveryOutcome::Panicked(_) => Self::Rewind(Ok(())),
        }
    }
}

/// Run `handler` on one message, turning a panic into an outcome.
pub async fn handle_delivery(
    handler: &dyn MessageHandler,
    record: &DeliveryRecord<'_>,
) -> DeliveryOutcome {
    match AssertUnwindSafe(handler.handle(record.payload))
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => DeliveryOutcome::Handled,
        Ok(Err(e)) => {
            error!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                error = %e,
                "Failed to handle message"
            );
            DeliveryOutcome::Failed(e)
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                panic = %message,
                "Message handler panicked"
            );
            DeliveryOutcome::Panicked(message)
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
