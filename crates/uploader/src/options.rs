//! Upload configuration and caller hooks.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chunklift_protocol::constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_FIELD_NAME, DEFAULT_MAX_CONCURRENT_CHUNKS, DEFAULT_MAX_RETRIES,
    DEFAULT_PROGRESS_INTERVAL, DEFAULT_RETRY_DELAY,
};
use chunklift_protocol::{HttpMethod, ServerResponse, UploadResponse};
use chunklift_transfer::{CompressionOptions, ProgressCallback, ValidationLimits};

use crate::UploadError;

/// Options for a single upload.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Run the validator before uploading.
    pub validate: bool,
    /// Limits handed to the validator.
    pub validation: ValidationLimits,
    /// Run the compressor with these settings before uploading.
    pub compress: Option<CompressionOptions>,

    /// Target endpoint. Required.
    pub url: String,
    pub method: HttpMethod,
    /// Extra request headers.
    pub headers: BTreeMap<String, String>,
    /// Query string parameters.
    pub params: BTreeMap<String, String>,
    /// Multipart field carrying the file or chunk bytes.
    pub field_name: String,
    /// Extra multipart text fields sent with every request.
    pub fields: BTreeMap<String, String>,
    /// Keep cookies set by the server and send them on later requests.
    pub with_credentials: bool,
    /// Per-request deadline.
    pub timeout: Option<Duration>,

    /// Split files larger than `chunk_size` into chunks.
    pub use_chunked_upload: bool,
    pub chunk_size: u64,
    pub max_concurrent_chunks: usize,
    /// Retries after the first failed attempt of a chunk.
    pub max_retries: u32,
    pub retry_delay: Duration,

    pub report_progress: bool,
    pub progress_interval: Duration,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            validate: false,
            validation: ValidationLimits::default(),
            compress: None,
            url: String::new(),
            method: HttpMethod::default(),
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            field_name: DEFAULT_FIELD_NAME.to_string(),
            fields: BTreeMap::new(),
            with_credentials: false,
            timeout: None,
            use_chunked_upload: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrent_chunks: DEFAULT_MAX_CONCURRENT_CHUNKS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            report_progress: true,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

impl UploadOptions {
    /// Default options targeting `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Checks the options before any work starts.
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.url.trim().is_empty() {
            return Err(UploadError::InvalidOptions("url is required".into()));
        }
        let url = reqwest::Url::parse(&self.url)
            .map_err(|e| UploadError::InvalidOptions(format!("invalid url {}: {e}", self.url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(UploadError::InvalidOptions(format!(
                "unsupported url scheme: {}",
                url.scheme()
            )));
        }
        if self.field_name.is_empty() {
            return Err(UploadError::InvalidOptions("field_name must not be empty".into()));
        }
        if self.chunk_size == 0 {
            return Err(UploadError::InvalidOptions("chunk_size must be positive".into()));
        }
        if self.max_concurrent_chunks == 0 {
            return Err(UploadError::InvalidOptions(
                "max_concurrent_chunks must be positive".into(),
            ));
        }
        if self.report_progress && self.progress_interval.is_zero() {
            return Err(UploadError::InvalidOptions(
                "progress_interval must be positive".into(),
            ));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(UploadError::InvalidOptions("timeout must be positive".into()));
        }
        Ok(())
    }

    /// Returns `true` if a source of `size` bytes goes out in chunks.
    pub fn should_chunk(&self, size: u64) -> bool {
        self.use_chunked_upload && size > self.chunk_size
    }
}

/// Passed to [`UploadHooks::on_chunk_complete`].
#[derive(Debug, Clone)]
pub struct ChunkInfo {
    pub upload_id: String,
    pub index: usize,
    pub total_chunks: usize,
    /// Bytes in this chunk.
    pub size: u64,
    pub response: ServerResponse,
}

pub type StartHook = Arc<dyn Fn(&str) + Send + Sync>;
pub type ChunkHook = Arc<dyn Fn(ChunkInfo) + Send + Sync>;
pub type CompleteHook = Arc<dyn Fn(&UploadResponse) + Send + Sync>;
pub type ErrorHook = Arc<dyn Fn(&UploadError) + Send + Sync>;
pub type CancelHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Caller callbacks for one upload. All are optional.
///
/// `on_complete`, `on_error` and `on_cancel` are mutually exclusive and fire
/// at most once. Hooks run on runtime worker threads and should not block.
#[derive(Clone, Default)]
pub struct UploadHooks {
    pub on_progress: Option<ProgressCallback>,
    pub on_chunk_complete: Option<ChunkHook>,
    pub on_start: Option<StartHook>,
    pub on_complete: Option<CompleteHook>,
    pub on_error: Option<ErrorHook>,
    pub on_cancel: Option<CancelHook>,
}

impl UploadHooks {
    pub fn on_progress(
        mut self,
        f: impl Fn(chunklift_protocol::UploadProgress) + Send + Sync + 'static,
    ) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    pub fn on_chunk_complete(mut self, f: impl Fn(ChunkInfo) + Send + Sync + 'static) -> Self {
        self.on_chunk_complete = Some(Arc::new(f));
        self
    }

    pub fn on_start(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_start = Some(Arc::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl Fn(&UploadResponse) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&UploadError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_cancel(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_cancel = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for UploadHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadHooks")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_chunk_complete", &self.on_chunk_complete.is_some())
            .field("on_start", &self.on_start.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_cancel", &self.on_cancel.is_some())
            .finish()
    }
}
