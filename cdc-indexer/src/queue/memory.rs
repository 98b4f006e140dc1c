//! In-memory queue implementing both queue ports.
//!
//! Keeps every topic as an append-only log with a fetch position and a
//! committed cursor. Like a long-lived consumer, the fetch position survives
//! between `dequeue` sessions; a failed or panicking delivery rewinds it so
//! the next session redelivers that message.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, Notify};
use tracing::debug;

use crate::errors::IngestError;
use crate::queue::{
    handle_delivery, DeliveryRecord, Dequeuer, Disposition, Enqueuer, MessageHandler,
};

#[derive(Debug, Default)]
struct TopicLog {
    messages: Vec<Vec<u8>>,
    position: usize,
    committed: usize,
}

/// In-memory at-least-once queue.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    topics: Mutex<HashMap<String, TopicLog>>,
    published: Notify,
    closed: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages ever published to `topic`.
    pub fn len(&self, topic: &str) -> usize {
        self.lock()
            .map(|topics| topics.get(topic).map_or(0, |log| log.messages.len()))
            .unwrap_or(0)
    }

    /// Number of messages of `topic` not yet committed.
    pub fn pending(&self, topic: &str) -> usize {
        self.lock()
            .map(|topics| {
                topics
                    .get(topic)
                    .map_or(0, |log| log.messages.len() - log.committed)
            })
            .unwrap_or(0)
    }

    /// Payloads published to `topic`, in order.
    pub fn messages(&self, topic: &str) -> Vec<Vec<u8>> {
        self.lock()
            .map(|topics| {
                topics
                    .get(topic)
                    .map(|log| log.messages.clone())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, TopicLog>>, IngestError> {
        self.topics
            .lock()
            .map_err(|_| IngestError::ChannelError("memory queue lock poisoned".to_string()))
    }

    /// Fetch the message at the fetch position and advance past it.
    fn fetch(&self, topic: &str) -> Result<Option<(usize, Vec<u8>)>, IngestError> {
        let mut topics = self.lock()?;
        let Some(log) = topics.get_mut(topic) else {
            return Ok(None);
        };
        let offset = log.position;
        let fetched = log.messages.get(offset).cloned();
        if fetched.is_some() {
            log.position += 1;
        }
        Ok(fetched.map(|payload| (offset, payload)))
    }

    fn commit(&self, topic: &str, offset: usize) -> Result<(), IngestError> {
        let mut topics = self.lock()?;
        if let Some(log) = topics.get_mut(topic) {
            log.committed = log.committed.max(offset + 1);
        }
        Ok(())
    }

    fn rewind(&self, topic: &str, offset: usize) -> Result<(), IngestError> {
        let mut topics = self.lock()?;
        if let Some(log) = topics.get_mut(topic) {
            log.position = offset;
        }
        Ok(())
    }
}

#[async_trait]
impl Enqueuer for MemoryQueue {
    async fn enqueue(&self, topic: &str, payload: &[u8]) -> Result<(), IngestError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IngestError::Closed("memory queue"));
        }
        self.lock()?
            .entry(topic.to_string())
            .or_default()
            .messages
            .push(payload.to_vec());
        self.published.notify_waiters();
        Ok(())
    }

    async fn close(&self) -> Result<(), IngestError> {
        self.closed.store(true, Ordering::Release);
        self.published.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl Dequeuer for MemoryQueue {
    async fn dequeue(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), IngestError> {
        loop {
            if !matches!(shutdown.try_recv(), Err(TryRecvError::Empty)) {
                return Ok(());
            }

            // Register before checking so a publish in between is not missed
            let published = self.published.notified();

            if let Some((offset, payload)) = self.fetch(topic)? {
                let record = DeliveryRecord {
                    topic,
                    partition: 0,
                    offset: i64::try_from(offset).unwrap_or(i64::MAX),
                    payload: &payload,
                };
                match Disposition::from(handle_delivery(handler.as_ref(), &record).await) {
                    Disposition::Mark => self.commit(topic, offset)?,
                    Disposition::Rewind(result) => {
                        self.rewind(topic, offset)?;
                        return result;
                    }
                }
                continue;
            }

            if self.closed.load(Ordering::Acquire) {
                debug!(topic = %topic, "Memory queue closed and drained");
                return Ok(());
            }

            tokio::select! {
                _ = shutdown.recv() => return Ok(()),
                _ = published => {}
            }
        }
    }

    async fn close(&self) -> Result<(), IngestError> {
        Enqueuer::close(self).await
    }
}
