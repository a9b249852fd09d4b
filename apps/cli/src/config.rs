//! Uploader configuration.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/chunklift/config.toml`
//! - Windows: `%APPDATA%/chunklift/config.toml`

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chunklift_protocol::HttpMethod;
use chunklift_protocol::constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_FIELD_NAME, DEFAULT_MAX_CONCURRENT_CHUNKS, DEFAULT_MAX_RETRIES,
    DEFAULT_PROGRESS_INTERVAL, DEFAULT_RETRY_DELAY,
};
use chunklift_transfer::ValidationLimits;
use chunklift_uploader::UploadOptions;
use serde::{Deserialize, Serialize};

/// Uploader configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Default upload endpoint. Empty means it must be given on the command line.
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub method: HttpMethod,

    /// Multipart field carrying the file bytes.
    #[serde(default = "default_field_name")]
    pub field_name: String,

    /// Split files larger than `chunk_size` into chunks.
    #[serde(default = "default_true")]
    pub use_chunked_upload: bool,

    /// Chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    #[serde(default = "default_max_concurrent_chunks")]
    pub max_concurrent_chunks: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between chunk attempts, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Per-request timeout in seconds. Unset means no deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Keep server cookies across chunk requests.
    #[serde(default)]
    pub with_credentials: bool,

    /// Progress log interval in milliseconds.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// Check files against `validation` before uploading.
    #[serde(default)]
    pub validate: bool,

    #[serde(default)]
    pub validation: ValidationLimits,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub params: BTreeMap<String, String>,

    /// Extra multipart fields sent with every request.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

fn default_field_name() -> String {
    DEFAULT_FIELD_NAME.into()
}

fn default_true() -> bool {
    true
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_max_concurrent_chunks() -> usize {
    DEFAULT_MAX_CONCURRENT_CHUNKS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY.as_millis() as u64
}

fn default_progress_interval_ms() -> u64 {
    DEFAULT_PROGRESS_INTERVAL.as_millis() as u64
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: HttpMethod::default(),
            field_name: default_field_name(),
            use_chunked_upload: default_true(),
            chunk_size: default_chunk_size(),
            max_concurrent_chunks: default_max_concurrent_chunks(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout_secs: None,
            with_credentials: false,
            progress_interval_ms: default_progress_interval_ms(),
            validate: false,
            validation: ValidationLimits::default(),
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            fields: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Loads configuration from the default location, creating it if missing.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Loads configuration from `path`, creating a default file if missing.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Headers may carry tokens.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Builds upload options from this configuration.
    pub fn upload_options(&self) -> UploadOptions {
        UploadOptions {
            validate: self.validate,
            validation: self.validation.clone(),
            url: self.url.clone(),
            method: self.method,
            headers: self.headers.clone(),
            params: self.params.clone(),
            field_name: self.field_name.clone(),
            fields: self.fields.clone(),
            with_credentials: self.with_credentials,
            timeout: self.timeout_secs.map(Duration::from_secs),
            use_chunked_upload: self.use_chunked_upload,
            chunk_size: self.chunk_size,
            max_concurrent_chunks: self.max_concurrent_chunks,
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            progress_interval: Duration::from_millis(self.progress_interval_ms),
            ..UploadOptions::default()
        }
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("chunklift")
            .join("config.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("chunklift").join("config.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/chunklift/config.toml"))
    }
}
