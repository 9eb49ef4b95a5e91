use thiserror::Error;

use murmur_types::api::ErrorKind;

use crate::registry::ConnectionId;

/// Failure of the persistence backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Per-connection delivery failure. Contained inside fan-out, never
/// returned from `publish`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("outbound channel closed")]
    Closed,
    #[error("outbound queue full")]
    Backpressure,
}

/// Errors returned to publishers and query callers.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),

    #[error("message was not persisted: {0}")]
    Persistence(#[from] StoreError),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HubError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateConnection(_) => ErrorKind::DuplicateConnection,
            Self::Persistence(_) => ErrorKind::Persistence,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<tokio::task::JoinError> for HubError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("task failed: {}", err))
    }
}

impl From<serde_json::Error> for HubError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("encoding failed: {}", err))
    }
}
