//! Error types for the upload pipeline

use std::path::PathBuf;
use thiserror::Error;

use crate::api::ApiError;

/// Result type for upload operations
pub type UploadResult<T> = Result<T, UploadError>;

/// Upload error types
#[derive(Debug, Error)]
pub enum UploadError {
    /// Upload was cancelled
    #[error("Upload cancelled")]
    Cancelled,

    /// Source path missing or not a regular file
    #[error("Source file not found or not a regular file: {}", .0.display())]
    NotFound(PathBuf),

    /// Failed to read the source file
    #[error("Failed to read local file: {0}")]
    FileReadError(String),

    /// A chunk reached the cipher out of sequence
    #[error("Chunk {actual} presented to the cipher out of order (expected {expected})")]
    OutOfOrderChunk { expected: u64, actual: u64 },

    /// HTTP status non-2xx or connection failure
    #[error("HTTP transport error: {0}")]
    TransportError(String),

    /// The service answered with a numeric error code
    #[error("Service returned error code {0}")]
    ServiceError(i64),

    /// Unexpected server response where a token was required
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// The MAC worker did not drain in time; the integrity tag is partial
    #[error("Integrity tag not established: MAC worker did not drain in time")]
    IntegrityError,

    /// Key handling or cipher failure
    #[error("Encryption error: {0}")]
    EncryptionError(String),

    /// Maximum retries exceeded for a chunk
    #[error("Maximum retries ({max_retries}) exceeded for chunk {chunk_index}")]
    MaxRetriesExceeded { chunk_index: u64, max_retries: u32 },

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl UploadError {
    /// Check if this error is worth retrying at the transfer layer
    pub fn is_retryable(&self) -> bool {
        matches!(self, UploadError::TransportError(_))
    }

    /// Check if this error is due to cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, UploadError::Cancelled)
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        UploadError::ProtocolError(message.into())
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        UploadError::TransportError(message.into())
    }
}

impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        UploadError::FileReadError(err.to_string())
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        UploadError::TransportError(err.to_string())
    }
}

impl From<ApiError> for UploadError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Service(code) => UploadError::ServiceError(code),
            ApiError::Transport(message) => UploadError::TransportError(message),
            ApiError::Malformed(message) => UploadError::ProtocolError(message),
        }
    }
}
