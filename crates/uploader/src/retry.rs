use std::future::Future;
use std::time::Duration;

use chunklift_transfer::UploadSession;
use tracing::warn;

use crate::{UploadError, UploadOptions};

/// Bounded re-attempts of one chunk with a fixed delay between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Wait between attempts. Never applied after the last one.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Total attempts allowed.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Runs `op` until it succeeds or the attempts run out.
    ///
    /// `op` receives the 1-based attempt number. The session checkpoint is
    /// passed before every attempt and every wait, so a pause holds the
    /// retry loop and a cancellation ends it. A [`UploadError::Cancelled`]
    /// from `op` is returned as-is.
    pub async fn run<T, F, Fut>(
        &self,
        session: &UploadSession,
        chunk_index: usize,
        mut op: F,
    ) -> Result<T, UploadError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, UploadError>>,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            session.checkpoint().await?;

            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(UploadError::Cancelled) => return Err(UploadError::Cancelled),
                Err(_) if session.is_cancelled() => return Err(UploadError::Cancelled),
                Err(err) => err,
            };

            session.record_chunk_failure(chunk_index, attempt, &err.to_string());
            warn!(
                upload_id = %session.id(),
                chunk = chunk_index,
                attempt,
                max_attempts,
                error = %err,
                "chunk attempt failed"
            );

            if attempt >= max_attempts {
                return Err(UploadError::RetryExhausted {
                    chunk_index,
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            session.checkpoint().await?;
            tokio::select! {
                biased;
                _ = session.cancelled() => return Err(UploadError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }
    }
}

impl From<&UploadOptions> for RetryPolicy {
    fn from(opts: &UploadOptions) -> Self {
        Self::new(opts.max_retries, opts.retry_delay)
    }
}
