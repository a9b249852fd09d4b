use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default multipart field carrying the file or chunk bytes.
pub const DEFAULT_FIELD_NAME: &str = "file";

/// Default chunk size (5 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Default number of chunk requests allowed in flight at once.
pub const DEFAULT_MAX_CONCURRENT_CHUNKS: usize = 3;

/// Default number of retries after the first failed chunk attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Fixed delay between chunk attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// How often progress snapshots are emitted.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// MIME type used when the source does not declare one.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

// Multipart text fields sent alongside every chunk so the server can
// reassemble the original file.

/// Zero-based index of the chunk.
pub const FIELD_CHUNK_INDEX: &str = "chunkIndex";
/// Total number of chunks in the upload.
pub const FIELD_TOTAL_CHUNKS: &str = "totalChunks";
/// Name of the original file.
pub const FIELD_FILE_NAME: &str = "fileName";
/// Size in bytes of the original file.
pub const FIELD_FILE_SIZE: &str = "fileSize";
/// MIME type of the original file.
pub const FIELD_FILE_TYPE: &str = "fileType";

/// HTTP method used for upload requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpMethod {
    #[default]
    #[serde(rename = "POST", alias = "post")]
    Post,
    #[serde(rename = "PUT", alias = "put")]
    Put,
    #[serde(rename = "PATCH", alias = "patch")]
    Patch,
}

impl HttpMethod {
    /// Returns the method token as sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            other => Err(format!("unsupported upload method: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_defaults_to_post() {
        assert_eq!(HttpMethod::default(), HttpMethod::Post);
    }

    #[test]
    fn method_parse_is_case_insensitive() {
        assert_eq!("put".parse::<HttpMethod>().unwrap(), HttpMethod::Put);
        assert_eq!("Patch".parse::<HttpMethod>().unwrap(), HttpMethod::Patch);
        assert!("GET".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn method_serialization() {
        assert_eq!(serde_json::to_string(&HttpMethod::Put).unwrap(), "\"PUT\"");
        let m: HttpMethod = serde_json::from_str("\"patch\"").unwrap();
        assert_eq!(m, HttpMethod::Patch);
    }
}
