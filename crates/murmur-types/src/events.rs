use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::ErrorKind;
use crate::models::{Message, Topic};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Connection registered; fan-out starts after this frame.
    Ready {
        connection_id: Uuid,
        identity: Option<String>,
        topics: Vec<Topic>,
    },

    /// A message was persisted and broadcast on a topic
    MessageCreate { topic: Topic, message: Message },

    /// Acknowledges a `Publish` command to its submitter
    Published { topic: Topic, message: Message },

    /// Current topic set after a Subscribe/Unsubscribe
    Subscribed { topics: Vec<Topic> },

    /// A command failed
    Error { kind: ErrorKind, message: String },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Persist and broadcast a message. `sender` falls back to the
    /// connection identity, `topic` to the default topic.
    Publish {
        content: String,
        #[serde(default)]
        sender: Option<String>,
        #[serde(default)]
        topic: Option<Topic>,
    },

    /// Add topics to this connection's subscription set.
    Subscribe { topics: Vec<Topic> },

    /// Remove topics from this connection's subscription set.
    Unsubscribe { topics: Vec<Topic> },
}
