use std::fmt;

/// Reasons why a batch transmission attempt failed.
///
/// Every variant is transient from the pipeline's point of view: the batch
/// degrades to the durable store and is retried later. Failures are never
/// surfaced to the event producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    Timeout,
    Network,
    /// Non-2xx response from the collection endpoint.
    RemoteStatus(u16),
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Timeout =>
                write!(f, "request timed out"),
            SendError::Network =>
                write!(f, "network error"),
            SendError::RemoteStatus(status) =>
                write!(f, "endpoint returned status {}", status),
        }
    }
}

impl std::error::Error for SendError {}

/// Errors internal to the durable store's backend.
///
/// These never escape the store: load failures reset to an empty store,
/// save failures are swallowed.
#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Corrupt(serde_json::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(err) =>
                write!(f, "snapshot i/o error: {}", err),
            StoreError::Corrupt(err) =>
                write!(f, "snapshot unreadable: {}", err),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Corrupt(err)
    }
}
