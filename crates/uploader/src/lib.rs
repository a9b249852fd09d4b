//! Resumable chunked HTTP uploads.
//!
//! An [`UploadManager`] validates and optionally compresses a source, then
//! sends it either in one multipart request or, when it is larger than the
//! configured chunk size, as indexed chunks with at most
//! `max_concurrent_chunks` requests in flight. Each chunk is retried on its
//! own before the upload fails.
//!
//! # Control
//!
//! Uploads can be paused, resumed and cancelled by id through the manager or
//! through the [`UploadHandle`] returned by [`UploadManager::start`]. A pause
//! stops new chunks from being dispatched; requests already in flight finish.
//! Cancelling aborts in-flight requests too.
//!
//! ```no_run
//! # async fn demo() -> Result<(), chunklift_uploader::UploadError> {
//! use chunklift_transfer::UploadSource;
//! use chunklift_uploader::{UploadHooks, UploadManager, UploadOptions};
//!
//! let manager = UploadManager::new()?;
//! let source = UploadSource::from_path("clip.mp4").await?;
//! let hooks = UploadHooks::default().on_progress(|p| println!("{:.1}%", p.progress));
//! let response = manager
//!     .upload_file(source, UploadOptions::new("https://example.com/upload"), hooks)
//!     .await?;
//! println!("{} bytes/s", response.average_speed);
//! # Ok(())
//! # }
//! ```

mod controller;
pub mod error;
pub mod manager;
pub mod options;
pub mod retry;
pub mod scheduler;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-export primary types for convenience.
pub use error::UploadError;
pub use manager::{UploadHandle, UploadManager};
pub use options::{ChunkInfo, UploadHooks, UploadOptions};
pub use retry::RetryPolicy;
pub use scheduler::ChunkScheduler;
pub use transport::{
    ByteCounter, ChunkMetadata, HttpTransport, RequestTarget, TransferRequest, Transport,
};
