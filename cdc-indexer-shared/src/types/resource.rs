//! Resource types and their logical index buckets.

use std::fmt;

/// Index used for resource types without a dedicated bucket.
pub const DEFAULT_INDEX: &str = "kong-default";

/// Resource type parsed from segment 3 of an event key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Service,
    Node,
    Upstream,
    StoreEvent,
    Other(String),
}

impl ResourceType {
    /// Parse a key segment. Never fails; unknown segments become [`ResourceType::Other`].
    pub fn parse(segment: &str) -> Self {
        match segment {
            "service" => Self::Service,
            "node" => Self::Node,
            "upstream" => Self::Upstream,
            "store_event" => Self::StoreEvent,
            other => Self::Other(other.to_string()),
        }
    }

    /// The key segment this resource type was parsed from.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Service => "service",
            Self::Node => "node",
            Self::Upstream => "upstream",
            Self::StoreEvent => "store_event",
            Self::Other(other) => other,
        }
    }

    /// The logical index documents of this resource type are routed to.
    pub fn index_name(&self) -> &'static str {
        match self {
            Self::Service => "kong-services",
            Self::Node => "kong-nodes",
            Self::Upstream => "kong-upstreams",
            Self::StoreEvent => "kong-events",
            Self::Other(_) => DEFAULT_INDEX,
        }
    }

    /// Every index a document can be routed to.
    pub fn known_indices() -> [&'static str; 5] {
        [
            "kong-services",
            "kong-nodes",
            "kong-upstreams",
            "kong-events",
            DEFAULT_INDEX,
        ]
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
