use crate::config::ValidationError;
use crate::decoder::DecodeError;
use row_store::StoreError;
use thiserror::Error;

/// Result type alias for data-receiver operations
pub type Result<T, E = DataReceiverError> = std::result::Result<T, E>;

/// Errors that can occur while receiving a batch
#[derive(Error, Debug)]
pub enum DataReceiverError {
    #[error("Unknown table name: {0}")]
    UnknownEntity(String),

    #[error("Invalid value in record {index}: {source}")]
    Decode {
        index: usize,
        #[source]
        source: DecodeError,
    },

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("Failed to read request body: {0}")]
    RequestBodyError(String),

    #[error("Request body exceeds {0} bytes")]
    RequestBodyTooLarge(usize),

    #[error("Peer {0} is not in the allow list")]
    Forbidden(String),

    #[error("Response serialization error: {0}")]
    ResponseSerializationError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ValidationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DataReceiverError {
    /// Short label used to tag metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DataReceiverError::UnknownEntity(_) => "unknown_entity",
            DataReceiverError::Decode { .. } => "decode",
            DataReceiverError::Persistence(_) => "persistence",
            DataReceiverError::RequestBodyError(_) => "request_body",
            DataReceiverError::RequestBodyTooLarge(_) => "request_too_large",
            DataReceiverError::Forbidden(_) => "forbidden",
            DataReceiverError::ResponseSerializationError(_) => "serialization",
            DataReceiverError::Config(_) => "config",
            DataReceiverError::Io(_) => "io",
        }
    }
}
