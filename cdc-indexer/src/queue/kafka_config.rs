//! Kafka client configuration shared by the producer and consumer adapters.

use std::time::Duration;

use rdkafka::config::ClientConfig;

use crate::queue::ProducerMode;

/// Connection and delivery settings for Kafka.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaConfig {
    /// Broker addresses.
    pub brokers: Vec<String>,
    /// Topic the pipelines publish to and consume from.
    pub topic: String,
    /// Partition count used when the topic has to be created.
    pub topic_partitions: i32,
    /// Consumer group of the indexing pipeline.
    pub consumer_group: String,
    /// Producer send retries.
    pub retry_max: u32,
    /// Backoff between producer send retries.
    pub retry_backoff: Duration,
    pub producer_mode: ProducerMode,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            topic: "cdc.events".to_string(),
            topic_partitions: 1,
            consumer_group: "cdc-indexer".to_string(),
            retry_max: 5,
            retry_backoff: Duration::from_millis(100),
            producer_mode: ProducerMode::Sync,
        }
    }
}

impl KafkaConfig {
    /// Comma-separated broker list as librdkafka expects it.
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }

    /// Base client configuration shared by producer, consumer and admin clients.
    pub fn client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config.set("bootstrap.servers", self.bootstrap_servers());
        client_config
    }

    /// Producer configuration for the configured delivery mode.
    pub fn producer_config(&self) -> ClientConfig {
        let mut client_config = self.client_config();
        let acks = match self.producer_mode {
            ProducerMode::Sync => "all",
            ProducerMode::Async => "1",
        };

        client_config
            .set("client.id", "cdc-indexer-producer")
            .set("compression.type", "zstd")
            .set("message.timeout.ms", "5000")
            .set("acks", acks)
            .set("message.send.max.retries", self.retry_max.to_string())
            .set("retry.backoff.ms", self.retry_backoff.as_millis().to_string());

        client_config
    }

    /// Consumer configuration; offsets are stored only for handled messages.
    pub fn consumer_config(&self) -> ClientConfig {
        let mut client_config = self.client_config();
        client_config
            .set("group.id", &self.consumer_group)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "6000");

        client_config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brokers_are_joined() {
        let config = KafkaConfig {
            brokers: vec!["a:9092".to_string(), "b:9092".to_string()],
            ..KafkaConfig::default()
        };

        assert_eq!(config.client_config().get("bootstrap.servers"), Some("a:9092,b:9092"));
    }

    #[test]
    fn test_producer_acks_follow_mode() {
        let sync = KafkaConfig::default().producer_config();
        assert_eq!(sync.get("acks"), Some("all"));
        assert_eq!(sync.get("message.send.max.retries"), Some("5"));

        let async_config = KafkaConfig {
            producer_mode: ProducerMode::Async,
            ..KafkaConfig::default()
        };
        assert_eq!(async_config.producer_config().get("acks"), Some("1"));
    }

    #[test]
    fn test_consumer_stores_offsets_manually() {
        let client_config = KafkaConfig::default().consumer_config();

        assert_eq!(client_config.get("enable.auto.offset.store"), Some("false"));
        assert_eq!(client_config.get("auto.offset.reset"), Some("earliest"));
        assert_eq!(client_config.get("group.id"), Some("cdc-indexer"));
    }
}
