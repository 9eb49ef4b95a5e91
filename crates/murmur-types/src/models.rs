use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned message identifier. Monotonic in insertion order.
pub type MessageId = i64;

/// Topic every connection joins when it asks for nothing else.
pub const DEFAULT_TOPIC: &str = "messages";

/// A persisted chat message. All four fields are fixed once the store returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub sender: String,
    /// Creation instant, on the wire as epoch milliseconds.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// Named broadcast channel. Only a grouping key; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Topic {
    fn default() -> Self {
        Self(DEFAULT_TOPIC.to_string())
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for Topic {
    fn from(name: String) -> Self {
        Self(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_serializes_as_epoch_millis() {
        let message = Message {
            id: 7,
            content: "hi".into(),
            sender: "bob".into(),
            timestamp: DateTime::from_timestamp_millis(1_700_000_000_123).unwrap(),
        };

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["timestamp"], 1_700_000_000_123i64);
        assert_eq!(json["id"], 7);
    }

    #[test]
    fn topic_is_a_bare_string_on_the_wire() {
        let topic: Topic = serde_json::from_str("\"random\"").unwrap();
        assert_eq!(topic.as_str(), "random");
        assert_eq!(Topic::default().as_str(), DEFAULT_TOPIC);
    }
}
