use std::path::{Path, PathBuf};
use std::sync::Arc;

use chunklift_protocol::constants::DEFAULT_MIME_TYPE;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::warn;

use crate::{ByteRange, TransferError};

/// The payload of an upload: in-memory bytes or a file on disk.
///
/// Name, size and MIME type are fixed at construction. Cloning is cheap;
/// in-memory data is shared.
#[derive(Debug, Clone)]
pub struct UploadSource {
    name: String,
    mime_type: String,
    data: SourceData,
}

#[derive(Debug, Clone)]
enum SourceData {
    Memory(Arc<[u8]>),
    File { path: PathBuf, size: u64 },
}

impl UploadSource {
    /// Wraps an in-memory blob.
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let name = name.into();
        let mime_type = detect_mime_type(&name)
            .unwrap_or(DEFAULT_MIME_TYPE)
            .to_string();
        Self {
            name,
            mime_type,
            data: SourceData::Memory(Arc::from(data.into())),
        }
    }

    /// References a file on disk. The size is read once, here.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, TransferError> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(TransferError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path.display()),
            )));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".into());
        let mime_type = detect_mime_type(&name)
            .unwrap_or(DEFAULT_MIME_TYPE)
            .to_string();
        Ok(Self {
            name,
            mime_type,
            data: SourceData::File {
                path: path.to_path_buf(),
                size: metadata.len(),
            },
        })
    }

    /// Overrides the detected MIME type. A value that is not a
    /// `type/subtype` media type is replaced by the generic binary type.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        let mime_type = mime_type.into();
        if is_media_type(&mime_type) {
            self.mime_type = mime_type;
        } else {
            warn!(file = %self.name, mime_type = %mime_type, "ignoring malformed MIME type");
            self.mime_type = DEFAULT_MIME_TYPE.to_string();
        }
        self
    }

    /// Overrides the file name sent to the server.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Total size in bytes.
    pub fn size(&self) -> u64 {
        match &self.data {
            SourceData::Memory(bytes) => bytes.len() as u64,
            SourceData::File { size, .. } => *size,
        }
    }

    /// On-disk path, if the source is a file.
    pub fn path(&self) -> Option<&Path> {
        match &self.data {
            SourceData::Memory(_) => None,
            SourceData::File { path, .. } => Some(path),
        }
    }

    /// Reads the bytes covered by `range`.
    pub async fn read_range(&self, range: ByteRange) -> Result<Vec<u8>, TransferError> {
        let size = self.size();
        if range.start > range.end || range.end > size {
            return Err(TransferError::RangeOutOfBounds {
                start: range.start,
                end: range.end,
                size,
            });
        }

        match &self.data {
            SourceData::Memory(bytes) => {
                Ok(bytes[range.start as usize..range.end as usize].to_vec())
            }
            SourceData::File { path, .. } => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(std::io::SeekFrom::Start(range.start)).await?;
                let mut buf = vec![0u8; range.len() as usize];
                file.read_exact(&mut buf).await?;
                Ok(buf)
            }
        }
    }

    /// Reads the whole payload.
    pub async fn read_all(&self) -> Result<Vec<u8>, TransferError> {
        self.read_range(ByteRange::new(0, self.size())).await
    }
}

/// Guesses a MIME type from a file name's extension.
///
/// Covers the media the uploader is typically fed: images, video and
/// voice recordings.
pub fn detect_mime_type(name: &str) -> Option<&'static str> {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match ext.as_deref() {
        Some("png") => Some("image/png"),
        Some("jpg" | "jpeg") => Some("image/jpeg"),
        Some("gif") => Some("image/gif"),
        Some("webp") => Some("image/webp"),
        Some("heic") => Some("image/heic"),
        Some("mp4" | "m4v") => Some("video/mp4"),
        Some("mov") => Some("video/quicktime"),
        Some("webm") => Some("video/webm"),
        Some("mp3") => Some("audio/mpeg"),
        Some("m4a") => Some("audio/mp4"),
        Some("aac") => Some("audio/aac"),
        Some("wav") => Some("audio/wav"),
        Some("ogg" | "oga") => Some("audio/ogg"),
        Some("pdf") => Some("application/pdf"),
        Some("txt") => Some("text/plain"),
        Some("json") => Some("application/json"),
        _ => None,
    }
}

/// Returns `true` for a `type/subtype` media type, parameters allowed.
pub fn is_media_type(value: &str) -> bool {
    let essence = value.split(';').next().unwrap_or_default().trim();
    let Some((kind, subtype)) = essence.split_once('/') else {
        return false;
    };
    is_token(kind) && is_token(subtype)
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$&-^_.+".contains(&b))
}
