//! Upload error types.

use chunklift_transfer::TransferError;

/// Errors produced by an upload.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("compression failed: {0}")]
    Compression(String),

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("server returned {status}: {body}")]
    Transport { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("chunk {chunk_index} failed after {attempts} attempts: {source}")]
    RetryExhausted {
        chunk_index: usize,
        attempts: u32,
        #[source]
        source: Box<UploadError>,
    },

    #[error("request timed out")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upload task failed: {0}")]
    Task(String),
}

impl UploadError {
    /// Returns `true` for the cancellation outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<TransferError> for UploadError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Cancelled => Self::Cancelled,
            TransferError::Io(e) => Self::Io(e),
            other => Self::Task(other.to_string()),
        }
    }
}
