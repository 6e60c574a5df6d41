use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Delivery priority attached by the publisher
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl fmt::Display for EventPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventPriority::Low => write!(f, "low"),
            EventPriority::Normal => write!(f, "normal"),
            EventPriority::High => write!(f, "high"),
            EventPriority::Critical => write!(f, "critical"),
        }
    }
}

/// A typed, timestamped unit of data flowing through the pipeline
///
/// Middleware receive the event by exclusive reference while it is their
/// turn in the chain. Only enrichment and transformation stages are
/// expected to mutate it.
///
/// # Example
///
/// ```ignore
/// use event_pipeline::{Event, EventPriority};
///
/// let event = Event::new("order.created", "svc-a")
///     .with_target("billing")
///     .with_priority(EventPriority::High)
///     .with_metadata("encrypted", true);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub priority: EventPriority,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Event {
    /// Create an event with a fresh id, normal priority and the current time
    pub fn new(event_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            source: source.into(),
            target: String::new(),
            priority: EventPriority::Normal,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Insert or overwrite a metadata entry
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Metadata value as a string slice, if present and a JSON string
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// True only for a JSON `true` or the string `"true"` in any case
    pub fn metadata_flag(&self, key: &str) -> bool {
        match self.metadata.get(key) {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }
}
