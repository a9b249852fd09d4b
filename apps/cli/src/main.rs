//! Command-line front end for the chunked uploader.
//!
//! Flags override values from the TOML configuration file. Ctrl-C cancels
//! the upload and aborts any chunk requests still in flight.

mod config;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chunklift_protocol::HttpMethod;
use chunklift_transfer::UploadSource;
use chunklift_uploader::{UploadError, UploadHooks, UploadManager};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use config::Config;

#[derive(Parser, Debug)]
#[command(version, about = "Upload a file over HTTP in resumable chunks")]
struct Args {
    /// File to upload.
    file: PathBuf,

    /// Upload endpoint. Overrides the configured url.
    #[arg(short, long)]
    url: Option<String>,

    /// HTTP method (POST, PUT or PATCH).
    #[arg(short = 'X', long)]
    method: Option<HttpMethod>,

    /// Chunk size in bytes.
    #[arg(long)]
    chunk_size: Option<u64>,

    /// Maximum chunk requests in flight.
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    /// Retries per chunk after the first attempt.
    #[arg(long)]
    retries: Option<u32>,

    /// Per-request timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Send the file in a single request.
    #[arg(long)]
    no_chunks: bool,

    /// Extra multipart field, as name=value. Repeatable.
    #[arg(short = 'F', long = "field", value_parser = parse_field)]
    fields: Vec<(String, String)>,

    /// Extra request header, as name:value. Repeatable.
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Check the file against the configured limits first.
    #[arg(long)]
    validate: bool,

    /// Configuration file. Defaults to the per-user location.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn parse_field(s: &str) -> Result<(String, String), String> {
    split_pair(s, '=')
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    split_pair(s, ':')
}

fn split_pair(s: &str, sep: char) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once(sep)
        .ok_or_else(|| format!("expected name{sep}value, got {s:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty name in {s:?}"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(url) = self.url {
            config.url = url;
        }
        if let Some(method) = self.method {
            config.method = method;
        }
        if let Some(size) = self.chunk_size {
            config.chunk_size = size;
        }
        if let Some(n) = self.concurrency {
            config.max_concurrent_chunks = n;
        }
        if let Some(n) = self.retries {
            config.max_retries = n;
        }
        if let Some(secs) = self.timeout {
            config.timeout_secs = Some(secs);
        }
        if self.no_chunks {
            config.use_chunked_upload = false;
        }
        if self.validate {
            config.validate = true;
        }
        config.fields.extend(self.fields);
        config.headers.extend(self.headers);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "chunklift starting");

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let file = args.file.clone();
    args.apply(&mut config);

    if config.url.is_empty() {
        anyhow::bail!("no upload url: pass --url or set `url` in the configuration file");
    }

    let source = UploadSource::from_path(&file)
        .await
        .with_context(|| format!("cannot open {}", file.display()))?;

    let hooks = UploadHooks::default()
        .on_progress(|p| {
            tracing::info!(
                progress = format_args!("{:.1}%", p.progress),
                uploaded = p.uploaded_bytes,
                total = p.total_bytes,
                speed = format_args!("{:.0} B/s", p.speed),
                eta_ms = ?p.time_remaining_ms,
                "uploading"
            );
        })
        .on_chunk_complete(|chunk| {
            tracing::debug!(
                index = chunk.index,
                total = chunk.total_chunks,
                size = chunk.size,
                "chunk uploaded"
            );
        })
        .on_cancel(|id| tracing::warn!(upload_id = %id, "upload cancelled"));

    let manager = UploadManager::new()?;
    let handle = manager.start(source, config.upload_options(), hooks).await?;
    let id = handle.id().to_string();

    let wait = handle.wait();
    tokio::pin!(wait);

    let result = tokio::select! {
        result = &mut wait => result,
        _ = tokio::signal::ctrl_c() => {
            manager.cancel_upload(&id);
            // Bounded wait for the task to observe the cancellation.
            tokio::time::timeout(Duration::from_secs(5), &mut wait)
                .await
                .unwrap_or(Err(UploadError::Cancelled))
        }
    };

    match result {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Err(UploadError::Cancelled) => anyhow::bail!("upload {id} cancelled"),
        Err(err) => Err(err).context("upload failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pairs() {
        assert_eq!(
            parse_field("album=summer trip").unwrap(),
            ("album".to_string(), "summer trip".to_string())
        );
        assert_eq!(
            parse_header("Authorization: Bearer abc").unwrap(),
            ("Authorization".to_string(), "Bearer abc".to_string())
        );
        assert!(parse_field("novalue").is_err());
        assert!(parse_header(":value").is_err());
    }

    #[test]
    fn flags_override_config() {
        let args = Args::parse_from([
            "chunklift",
            "clip.mp4",
            "--url",
            "http://localhost:9000/upload",
            "-X",
            "put",
            "-j",
            "5",
            "--no-chunks",
            "-F",
            "album=trip",
            "-H",
            "X-Token: t1",
        ]);
        let mut config = Config {
            url: "https://configured.example.com".into(),
            ..Config::default()
        };
        args.apply(&mut config);

        assert_eq!(config.url, "http://localhost:9000/upload");
        assert_eq!(config.method, HttpMethod::Put);
        assert_eq!(config.max_concurrent_chunks, 5);
        assert!(!config.use_chunked_upload);
        assert_eq!(config.fields["album"], "trip");
        assert_eq!(config.headers["X-Token"], "t1");
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn unset_flags_keep_config() {
        let args = Args::parse_from(["chunklift", "clip.mp4"]);
        let mut config = Config {
            url: "https://configured.example.com".into(),
            chunk_size: 1024,
            ..Config::default()
        };
        args.apply(&mut config);
        assert_eq!(config.url, "https://configured.example.com");
        assert_eq!(config.chunk_size, 1024);
        assert!(config.use_chunked_upload);
    }
}
