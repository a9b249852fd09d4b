//! Chunked upload building blocks: byte-range planning, upload sources,
//! shared session state with its transition table, and periodic progress
//! reporting.
//!
//! Nothing in this crate talks to the network. The `chunklift-uploader`
//! crate drives these types over HTTP.

mod chunked;
mod progress;
mod source;
mod state;
mod types;
mod validation;

pub use chunked::{ByteRange, plan_chunks};
pub use progress::{ProgressCallback, ProgressTracker, compute_progress};
pub use source::{UploadSource, detect_mime_type, is_media_type};
pub use state::{SessionEvent, next_status};
pub use types::{UploadChunk, UploadSession};
pub use validation::{
    CompressionOptions, Compressor, FileValidator, LimitsValidator, ValidationLimits,
    ValidationReport,
};

use chunklift_protocol::UploadStatus;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cancelled")]
    Cancelled,

    #[error("invalid transition from {from:?} on {event}")]
    InvalidTransition {
        from: UploadStatus,
        event: &'static str,
    },

    #[error("byte range {start}..{end} outside source of {size} bytes")]
    RangeOutOfBounds { start: u64, end: u64, size: u64 },

    #[error("unknown chunk index: {0}")]
    UnknownChunk(usize),
}
