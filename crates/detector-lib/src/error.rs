//! Error types surfaced by the external collaborators

use thiserror::Error;

/// Failure talking to the reading store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("reading store unavailable: {0}")]
    Unavailable(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("malformed reading at line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure delivering an alert to the alert channel
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("alert channel closed")]
    Closed,

    #[error("alert endpoint returned status {0}")]
    Status(u16),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}
