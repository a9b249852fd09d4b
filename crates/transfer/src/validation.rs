//! Pre-flight seams: file validation and compression.
//!
//! Both run before a session exists. The uploader only needs the verdict
//! (or the replacement payload); how a validator screens content or how a
//! compressor resizes media is up to the implementation.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::UploadSource;

/// Outcome of validating a source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Reasons the source is rejected. Empty means accepted.
    pub errors: Vec<String>,
    /// Non-blocking observations.
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Limits checked by [`LimitsValidator`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationLimits {
    /// Largest accepted size in bytes.
    pub max_size: Option<u64>,
    /// Smallest accepted size in bytes.
    pub min_size: Option<u64>,
    /// Accepted MIME types. An entry ending in `/` or `/*` matches a family
    /// (`image/`, `video/*`). Empty accepts everything.
    pub allowed_types: Vec<String>,
    /// Accepted file extensions, without the dot. Empty accepts everything.
    pub allowed_extensions: Vec<String>,
}

/// Compression parameters handed to a [`Compressor`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionOptions {
    /// Target quality in `0..=100`.
    pub quality: Option<u8>,
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
}

/// Screens a source before upload.
pub trait FileValidator: Send + Sync {
    fn validate<'a>(
        &'a self,
        source: &'a UploadSource,
        limits: &'a ValidationLimits,
    ) -> Pin<Box<dyn Future<Output = ValidationReport> + Send + 'a>>;
}

/// Produces a possibly smaller replacement for a source.
pub trait Compressor: Send + Sync {
    fn compress<'a>(
        &'a self,
        source: UploadSource,
        options: &'a CompressionOptions,
    ) -> Pin<Box<dyn Future<Output = Result<UploadSource, String>> + Send + 'a>>;
}

/// Validator that checks size, MIME type and extension only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LimitsValidator;

impl LimitsValidator {
    /// Runs the checks synchronously.
    pub fn check(source: &UploadSource, limits: &ValidationLimits) -> ValidationReport {
        let mut report = ValidationReport::default();
        let size = source.size();

        if size == 0 {
            report.warnings.push("file is empty".into());
        }
        if let Some(max) = limits.max_size
            && size > max
        {
            report
                .errors
                .push(format!("file is {size} bytes, larger than the {max} byte limit"));
        }
        if let Some(min) = limits.min_size
            && size < min
        {
            report
                .errors
                .push(format!("file is {size} bytes, smaller than the {min} byte minimum"));
        }

        if !limits.allowed_types.is_empty()
            && !limits
                .allowed_types
                .iter()
                .any(|t| mime_matches(t, source.mime_type()))
        {
            report
                .errors
                .push(format!("file type {} is not allowed", source.mime_type()));
        }

        if !limits.allowed_extensions.is_empty() {
            let ext = Path::new(source.name())
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase())
                .unwrap_or_default();
            let allowed = limits
                .allowed_extensions
                .iter()
                .any(|a| a.trim_start_matches('.').eq_ignore_ascii_case(&ext));
            if !allowed {
                report
                    .errors
                    .push(format!("extension \"{ext}\" is not allowed"));
            }
        }

        report
    }
}

impl FileValidator for LimitsValidator {
    fn validate<'a>(
        &'a self,
        source: &'a UploadSource,
        limits: &'a ValidationLimits,
    ) -> Pin<Box<dyn Future<Output = ValidationReport> + Send + 'a>> {
        Box::pin(async move { Self::check(source, limits) })
    }
}

fn mime_matches(pattern: &str, mime: &str) -> bool {
    let pattern = pattern.trim().to_ascii_lowercase();
    let mime = mime.to_ascii_lowercase();
    if let Some(family) = pattern.strip_suffix('*') {
        return mime.starts_with(family);
    }
    if pattern.ends_with('/') {
        return mime.starts_with(&pattern);
    }
    pattern == mime
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(name: &str, size: usize) -> UploadSource {
        UploadSource::from_bytes(name, vec![0u8; size])
    }

    #[test]
    fn no_limits_accepts() {
        let report = LimitsValidator::check(&source("a.png", 10), &ValidationLimits::default());
        assert!(report.is_valid());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn empty_file_warns() {
        let report = LimitsValidator::check(&source("a.png", 0), &ValidationLimits::default());
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn rejects_oversized() {
        let limits = ValidationLimits {
            max_size: Some(5),
            ..Default::default()
        };
        let report = LimitsValidator::check(&source("a.png", 10), &limits);
        assert!(!report.is_valid());
        assert!(report.errors[0].contains("larger"));
    }

    #[test]
    fn rejects_undersized() {
        let limits = ValidationLimits {
            min_size: Some(50),
            ..Default::default()
        };
        assert!(!LimitsValidator::check(&source("a.png", 10), &limits).is_valid());
    }

    #[test]
    fn mime_families() {
        let limits = ValidationLimits {
            allowed_types: vec!["image/".into(), "video/*".into(), "audio/mpeg".into()],
            ..Default::default()
        };
        assert!(LimitsValidator::check(&source("a.png", 1), &limits).is_valid());
        assert!(LimitsValidator::check(&source("a.mov", 1), &limits).is_valid());
        assert!(LimitsValidator::check(&source("a.mp3", 1), &limits).is_valid());
        assert!(!LimitsValidator::check(&source("a.wav", 1), &limits).is_valid());
        assert!(!LimitsValidator::check(&source("a.pdf", 1), &limits).is_valid());
    }

    #[test]
    fn extensions() {
        let limits = ValidationLimits {
            allowed_extensions: vec![".JPG".into(), "png".into()],
            ..Default::default()
        };
        assert!(LimitsValidator::check(&source("photo.jpg", 1), &limits).is_valid());
        assert!(LimitsValidator::check(&source("photo.PNG", 1), &limits).is_valid());
        assert!(!LimitsValidator::check(&source("photo.gif", 1), &limits).is_valid());
        assert!(!LimitsValidator::check(&source("noext", 1), &limits).is_valid());
    }

    #[test]
    fn collects_every_reason() {
        let limits = ValidationLimits {
            max_size: Some(1),
            allowed_types: vec!["image/".into()],
            allowed_extensions: vec!["png".into()],
            ..Default::default()
        };
        let report = LimitsValidator::check(&source("clip.mp4", 10), &limits);
        assert_eq!(report.errors.len(), 3);
    }

    #[tokio::test]
    async fn trait_object_validates() {
        let validator: Box<dyn FileValidator> = Box::new(LimitsValidator);
        let limits = ValidationLimits {
            max_size: Some(1),
            ..Default::default()
        };
        let src = source("a.png", 2);
        let report = validator.validate(&src, &limits).await;
        assert!(!report.is_valid());
    }

    #[test]
    fn limits_deserialize_with_defaults() {
        let limits: ValidationLimits =
            serde_json::from_str(r#"{"max_size": 1024}"#).unwrap();
        assert_eq!(limits.max_size, Some(1024));
        assert!(limits.allowed_types.is_empty());
    }
}
