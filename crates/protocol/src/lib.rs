//! Wire types shared by the chunklift crates.
//!
//! Everything here is plain data: the multipart field names a server sees,
//! the progress snapshots a caller receives, and the parsed server replies.

pub mod constants;
pub mod types;

// Re-export primary types for convenience.
pub use constants::HttpMethod;
pub use types::{ResponseBody, ServerResponse, UploadProgress, UploadResponse, UploadStatus};
