//! Runtime settings loaded from environment variables.

use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::loader::LoaderConfig;
use crate::orchestrator::{IndexingConfig, IngestionConfig};
use crate::queue::{KafkaConfig, ProducerMode};
use crate::IndexingError;

const DEFAULT_KAFKA_BROKERS: &str = "localhost:9092";
const DEFAULT_KAFKA_TOPIC: &str = "cdc.events";
const DEFAULT_KAFKA_TOPIC_PARTITIONS: i32 = 1;
const DEFAULT_KAFKA_CONSUMER_GROUP: &str = "cdc-indexer";
const DEFAULT_KAFKA_RETRY_MAX: u32 = 5;
const DEFAULT_KAFKA_RETRY_BACKOFF_MS: u64 = 100;
const DEFAULT_OPENSEARCH_URLS: &str = "http://localhost:9200";
const DEFAULT_OPENSEARCH_MAX_RETRIES: usize = 3;
const DEFAULT_RETRY_INTERVAL_SECS: u64 = 15;
const DEFAULT_INDEX_BUFFER_SIZE: usize = 100;
const DEFAULT_INDEX_FLUSH_INTERVAL_SECS: u64 = 5;
const DEFAULT_INDEX_MAX_FLUSH_ATTEMPTS: u32 = 3;
const DEFAULT_INGEST_SOURCE_PATH: &str = "stream.jsonl";
const DEFAULT_INGEST_PUBLISH_DELAY_MS: u64 = 100;

/// Connection mode for OpenSearch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Fail immediately if connection fails.
    FailFast,
    /// Retry the connection every retry interval until it succeeds.
    #[default]
    Retry,
}

impl ConnectionMode {
    /// Valid values: "fail-fast" or "retry" (case-insensitive)
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "fail-fast" | "failfast" | "fail_fast" => Some(Self::FailFast),
            "retry" => Some(Self::Retry),
            _ => None,
        }
    }
}

/// OpenSearch connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSearchSettings {
    pub urls: Vec<String>,
    /// Transport retries per request.
    pub max_retries: usize,
    pub connection_mode: ConnectionMode,
    /// Pause between startup connection attempts in retry mode.
    pub retry_interval: Duration,
}

/// Settings of the ingestion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSettings {
    pub source_path: PathBuf,
    pub publish_delay: Duration,
}

/// All settings of the CDC indexer.
#[derive(Debug, Clone)]
pub struct Settings {
    pub kafka: KafkaConfig,
    pub opensearch: OpenSearchSettings,
    pub loader: LoaderConfig,
    pub ingest: IngestSettings,
}

impl Settings {
    /// Load settings from the process environment.
    ///
    /// # Environment Variables
    ///
    /// - `KAFKA_BROKERS`: Comma-separated broker list (default: localhost:9092)
    /// - `KAFKA_TOPIC`: Topic of the change events (default: cdc.events)
    /// - `KAFKA_TOPIC_PARTITIONS`: Partitions when creating the topic (default: 1)
    /// - `KAFKA_CONSUMER_GROUP`: Consumer group ID (default: cdc-indexer)
    /// - `KAFKA_RETRY_MAX`: Producer send retries (default: 5)
    /// - `KAFKA_RETRY_BACKOFF_MS`: Producer retry backoff (default: 100)
    /// - `KAFKA_PRODUCER_MODE`: "sync" or "async" (default: sync)
    /// - `OPENSEARCH_URLS`: Comma-separated node URLs (default: http://localhost:9200)
    /// - `OPENSEARCH_MAX_RETRIES`: Transport retries per request (default: 3)
    /// - `OPENSEARCH_CONNECTION_MODE`: "fail-fast" or "retry" (default: retry)
    /// - `OPENSEARCH_RETRY_INTERVAL_SECS`: Startup retry interval (default: 15)
    /// - `INDEX_BUFFER_SIZE`: Documents that trigger a flush (default: 100)
    /// - `INDEX_FLUSH_INTERVAL_SECS`: Periodic flush interval (default: 5)
    /// - `INDEX_MAX_FLUSH_ATTEMPTS`: Bulk attempts per document (default: 3)
    /// - `INGEST_SOURCE_PATH`: Event source file (default: stream.jsonl)
    /// - `INGEST_PUBLISH_DELAY_MS`: Pause between sync publishes (default: 100)
    pub fn from_env() -> Result<Self, IndexingError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load settings through `lookup`; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, IndexingError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let producer_mode = match get("KAFKA_PRODUCER_MODE") {
            Some(value) => ProducerMode::parse(&value).ok_or_else(|| {
                IndexingError::config(format!("Invalid KAFKA_PRODUCER_MODE: {:?}", value))
            })?,
            None => ProducerMode::Sync,
        };

        let connection_mode = match get("OPENSEARCH_CONNECTION_MODE") {
            Some(value) => ConnectionMode::parse(&value).ok_or_else(|| {
                IndexingError::config(format!("Invalid OPENSEARCH_CONNECTION_MODE: {:?}", value))
            })?,
            None => ConnectionMode::Retry,
        };

        let kafka = KafkaConfig {
            brokers: list(get("KAFKA_BROKERS"), DEFAULT_KAFKA_BROKERS),
            topic: get("KAFKA_TOPIC").unwrap_or_else(|| DEFAULT_KAFKA_TOPIC.to_string()),
            topic_partitions: positive(
                "KAFKA_TOPIC_PARTITIONS",
                parse(&get, "KAFKA_TOPIC_PARTITIONS", DEFAULT_KAFKA_TOPIC_PARTITIONS)?,
            )?,
            consumer_group: get("KAFKA_CONSUMER_GROUP")
                .unwrap_or_else(|| DEFAULT_KAFKA_CONSUMER_GROUP.to_string()),
            retry_max: parse(&get, "KAFKA_RETRY_MAX", DEFAULT_KAFKA_RETRY_MAX)?,
            retry_backoff: Duration::from_millis(parse(
                &get,
                "KAFKA_RETRY_BACKOFF_MS",
                DEFAULT_KAFKA_RETRY_BACKOFF_MS,
            )?),
            producer_mode,
        };
        if kafka.brokers.is_empty() {
            return Err(IndexingError::config("KAFKA_BROKERS lists no broker"));
        }

        let opensearch = OpenSearchSettings {
            urls: list(get("OPENSEARCH_URLS"), DEFAULT_OPENSEARCH_URLS),
            max_retries: parse(&get, "OPENSEARCH_MAX_RETRIES", DEFAULT_OPENSEARCH_MAX_RETRIES)?,
            connection_mode,
            retry_interval: Duration::from_secs(parse(
                &get,
                "OPENSEARCH_RETRY_INTERVAL_SECS",
                DEFAULT_RETRY_INTERVAL_SECS,
            )?),
        };
        if opensearch.urls.is_empty() {
            return Err(IndexingError::config("OPENSEARCH_URLS lists no URL"));
        }

        let loader = LoaderConfig {
            buffer_size: positive(
                "INDEX_BUFFER_SIZE",
                parse(&get, "INDEX_BUFFER_SIZE", DEFAULT_INDEX_BUFFER_SIZE)?,
            )?,
            flush_interval: Duration::from_secs(positive(
                "INDEX_FLUSH_INTERVAL_SECS",
                parse(&get, "INDEX_FLUSH_INTERVAL_SECS", DEFAULT_INDEX_FLUSH_INTERVAL_SECS)?,
            )?),
            max_flush_attempts: positive(
                "INDEX_MAX_FLUSH_ATTEMPTS",
                parse(&get, "INDEX_MAX_FLUSH_ATTEMPTS", DEFAULT_INDEX_MAX_FLUSH_ATTEMPTS)?,
            )?,
        };

        let ingest = IngestSettings {
            source_path: get("INGEST_SOURCE_PATH")
                .unwrap_or_else(|| DEFAULT_INGEST_SOURCE_PATH.to_string())
                .into(),
            publish_delay: Duration::from_millis(parse(
                &get,
                "INGEST_PUBLISH_DELAY_MS",
                DEFAULT_INGEST_PUBLISH_DELAY_MS,
            )?),
        };

        Ok(Self {
            kafka,
            opensearch,
            loader,
            ingest,
        })
    }

    /// Configuration of the ingestion pipeline.
    pub fn ingestion_config(&self) -> IngestionConfig {
        IngestionConfig {
            topic: self.kafka.topic.clone(),
            publish_delay: self.ingest.publish_delay,
            producer_mode: self.kafka.producer_mode,
        }
    }

    /// Configuration of the indexing pipeline.
    pub fn indexing_config(&self) -> IndexingConfig {
        IndexingConfig {
            topic: self.kafka.topic.clone(),
            ..IndexingConfig::default()
        }
    }
}

fn parse<T, F>(get: &F, key: &str, default: T) -> Result<T, IndexingError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value.trim().parse().map_err(|e| {
            IndexingError::config(format!("Invalid value {:?} for {}: {}", value, key, e))
        }),
        None => Ok(default),
    }
}

fn positive<T>(key: &str, value: T) -> Result<T, IndexingError>
where
    T: PartialOrd + Default,
{
    if value > T::default() {
        Ok(value)
    } else {
        Err(IndexingError::config(format!("{} must be greater than zero", key)))
    }
}

fn list(value: Option<String>, default: &str) -> Vec<String> {
    value
        .as_deref()
        .unwrap_or(default)
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, IndexingError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = settings(&[]).unwrap();

        assert_eq!(settings.kafka.brokers, vec!["localhost:9092"]);
        assert_eq!(settings.kafka.topic, "cdc.events");
        assert_eq!(settings.kafka.consumer_group, "cdc-indexer");
        assert_eq!(settings.kafka.producer_mode, ProducerMode::Sync);
        assert_eq!(settings.opensearch.urls, vec!["http://localhost:9200"]);
        assert_eq!(settings.opensearch.connection_mode, ConnectionMode::Retry);
        assert_eq!(settings.opensearch.retry_interval, Duration::from_secs(15));
        assert_eq!(settings.loader.buffer_size, 100);
        assert_eq!(settings.loader.flush_interval, Duration::from_secs(5));
        assert_eq!(settings.ingest.source_path, PathBuf::from("stream.jsonl"));
        assert_eq!(settings.ingest.publish_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_overrides() {
        let settings = settings(&[
            ("KAFKA_BROKERS", "k1:9092, k2:9092"),
            ("KAFKA_TOPIC", "kong.cdc"),
            ("KAFKA_PRODUCER_MODE", "async"),
            ("OPENSEARCH_URLS", "http://os1:9200,http://os2:9200"),
            ("OPENSEARCH_CONNECTION_MODE", "fail-fast"),
            ("INDEX_BUFFER_SIZE", "250"),
            ("INGEST_PUBLISH_DELAY_MS", "0"),
        ])
        .unwrap();

        assert_eq!(settings.kafka.brokers, vec!["k1:9092", "k2:9092"]);
        assert_eq!(settings.kafka.producer_mode, ProducerMode::Async);
        assert_eq!(settings.opensearch.urls.len(), 2);
        assert_eq!(settings.opensearch.connection_mode, ConnectionMode::FailFast);
        assert_eq!(settings.loader.buffer_size, 250);

        let ingestion = settings.ingestion_config();
        assert_eq!(ingestion.topic, "kong.cdc");
        assert!(ingestion.publish_delay.is_zero());
        assert_eq!(settings.indexing_config().topic, "kong.cdc");
    }

    #[test]
    fn test_empty_value_uses_default() {
        let settings = settings(&[("KAFKA_TOPIC", "  ")]).unwrap();
        assert_eq!(settings.kafka.topic, "cdc.events");
    }

    #[test]
    fn test_rejects_invalid_number() {
        let result = settings(&[("INDEX_BUFFER_SIZE", "lots")]);
        assert!(matches!(result, Err(IndexingError::ConfigError(_))));
    }

    #[test]
    fn test_rejects_zero_buffer_size() {
        let result = settings(&[("INDEX_BUFFER_SIZE", "0")]);
        assert!(matches!(result, Err(IndexingError::ConfigError(_))));
    }

    #[test]
    fn test_rejects_unknown_modes() {
        assert!(settings(&[("KAFKA_PRODUCER_MODE", "eventually")]).is_err());
        assert!(settings(&[("OPENSEARCH_CONNECTION_MODE", "sometimes")]).is_err());
    }

    #[test]
    fn test_rejects_empty_broker_list() {
        let result = settings(&[("KAFKA_BROKERS", ",,")]);
        assert!(matches!(result, Err(IndexingError::ConfigError(_))));
    }
}
