//! Remote store errors

use thiserror::Error;

/// Errors raised by remote document store operations
#[derive(Error, Debug)]
pub enum RemoteError {
    /// The service could not be reached at all
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    /// HTTP transport failure (connect, timeout, body)
    #[error("Request to '{url}' failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The service answered with an error status
    #[error("Remote store returned {status} for '{path}': {body}")]
    Status {
        path: String,
        status: u16,
        body: String,
    },

    /// A document could not be converted into an entity
    #[error("Invalid document at '{path}': {details}")]
    Decode { path: String, details: String },

    #[error("Document '{0}' not found")]
    NotFound(String),

    /// A batch exceeded the provider write limit
    #[error("Batch of {size} writes exceeds the limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    /// Some chunks of a batched delete failed; committed chunks stay deleted
    #[error("Batch delete incomplete: {deleted} deleted, {failed} failed")]
    PartialBatch { deleted: usize, failed: usize },

    #[error("Watch stream failed: {0}")]
    Watch(String),

    #[error("Invalid remote URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

impl RemoteError {
    /// Network-level failures worth retrying later
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Unavailable(_) | RemoteError::Watch(_) => true,
            RemoteError::Transport { source, .. } => source.is_connect() || source.is_timeout(),
            RemoteError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Result type for remote operations
pub type RemoteResult<T> = Result<T, RemoteError>;
