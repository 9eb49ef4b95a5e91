use serde::{Deserialize, Serialize};

use crate::models::Topic;

// -- Messages --

/// Body of `POST /api/messages/send`. Clients of the older API also post
/// `id`/`timestamp`; those are assigned by the store and ignored here.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    pub sender: String,
    #[serde(default)]
    pub topic: Option<Topic>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: u64,
}

// -- Errors --

/// Machine-readable error kind shared by the HTTP and WebSocket surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DuplicateConnection,
    Persistence,
    NotFound,
    InvalidArgument,
    Internal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorKind,
    pub message: String,
}
