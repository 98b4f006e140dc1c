//! Raw change-capture event types.
//!
//! This module defines the JSON shape of a single CDC record as it is read from
//! the source stream and published to Kafka.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One change record describing the state of an entity at a point in time.
///
/// # Fields
///
/// - `before`: Prior state of the entity, when the source captured it
/// - `after`: Post-change state; `None` marks an event that cannot be indexed
/// - `op`: Single-character operation code (`c`, `u`, `d`, `r`)
/// - `timestamp_millis`: Event generation time in epoch milliseconds (`ts_ms`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RawEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Map<String, Value>>,
    #[serde(default)]
    pub after: Option<After>,
    #[serde(default)]
    pub op: String,
    #[serde(rename = "ts_ms", default)]
    pub timestamp_millis: i64,
}

/// Post-change state of an entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct After {
    /// `/`-delimited composite key: `/{tenant}/{_}/{resource_type}/{local_id}/...`
    pub key: String,
    #[serde(default)]
    pub value: AfterValue,
}

/// Typed payload carried by [`After`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AfterValue {
    #[serde(rename = "type", default)]
    pub kind: i64,
    #[serde(default)]
    pub object: Option<Map<String, Value>>,
}

/// Operation carried by a [`RawEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
    /// Snapshot read emitted while the source is being bootstrapped.
    Read,
    Other(String),
}

impl Operation {
    /// Map an operation code to an [`Operation`].
    pub fn from_code(code: &str) -> Self {
        match code {
            "c" => Self::Create,
            "u" => Self::Update,
            "d" => Self::Delete,
            "r" => Self::Read,
            other => Self::Other(other.to_string()),
        }
    }
}

impl RawEvent {
    /// The operation this event describes.
    pub fn operation(&self) -> Operation {
        Operation::from_code(&self.op)
    }

    /// Whether the originating operation was a delete.
    pub fn is_delete(&self) -> bool {
        self.operation() == Operation::Delete
    }

    /// The event generation time, if `ts_ms` is representable.
    pub fn event_time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp_millis).single()
    }

    /// Whether the event claims to have been generated after `now`.
    ///
    /// Used as a clock-skew guard before publishing.
    pub fn is_from_future(&self, now: DateTime<Utc>) -> bool {
        self.timestamp_millis > now.timestamp_millis()
    }
}
