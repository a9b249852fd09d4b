//! Bounded-concurrency chunk dispatch.

use std::sync::Arc;

use chunklift_protocol::ServerResponse;
use chunklift_transfer::{ByteRange, UploadSession, UploadSource};
use tokio::task::{JoinError, JoinSet};
use tracing::debug;

use crate::options::{ChunkHook, ChunkInfo};
use crate::retry::RetryPolicy;
use crate::transport::{ChunkMetadata, RequestTarget, TransferRequest, Transport};
use crate::UploadError;

type ChunkOutcome = Result<(usize, ServerResponse), UploadError>;

/// Uploads every pending chunk of a session with at most
/// `max_concurrent` requests outstanding.
pub struct ChunkScheduler {
    session: Arc<UploadSession>,
    source: UploadSource,
    transport: Arc<dyn Transport>,
    target: Arc<RequestTarget>,
    retry: RetryPolicy,
    max_concurrent: usize,
    on_chunk_complete: Option<ChunkHook>,
}

impl ChunkScheduler {
    pub fn new(
        session: Arc<UploadSession>,
        source: UploadSource,
        transport: Arc<dyn Transport>,
        target: Arc<RequestTarget>,
        retry: RetryPolicy,
        max_concurrent: usize,
    ) -> Self {
        Self {
            session,
            source,
            transport,
            target,
            retry,
            max_concurrent: max_concurrent.max(1),
            on_chunk_complete: None,
        }
    }

    pub fn with_chunk_hook(mut self, hook: Option<ChunkHook>) -> Self {
        self.on_chunk_complete = hook;
        self
    }

    /// Dispatches chunks in index order and waits for all of them.
    ///
    /// Chunks already acknowledged are skipped. The first chunk that fails
    /// for good aborts the ones still in flight.
    pub async fn run(&self) -> Result<(), UploadError> {
        let mut in_flight = JoinSet::new();
        let result = self.drive(&mut in_flight).await;
        if result.is_err() {
            in_flight.shutdown().await;
        }
        result
    }

    async fn drive(&self, in_flight: &mut JoinSet<ChunkOutcome>) -> Result<(), UploadError> {
        for (index, range) in self.session.pending_chunks() {
            while in_flight.len() >= self.max_concurrent {
                if let Some(joined) = in_flight.join_next().await {
                    self.settle(joined)?;
                }
            }
            self.session.checkpoint().await?;

            debug!(
                upload_id = %self.session.id(),
                chunk = index,
                start = range.start,
                end = range.end,
                "dispatching chunk"
            );
            in_flight.spawn(self.job(index, range).run());
        }

        while let Some(joined) = in_flight.join_next().await {
            self.settle(joined)?;
        }
        Ok(())
    }

    fn job(&self, index: usize, range: ByteRange) -> ChunkJob {
        ChunkJob {
            index,
            range,
            session: Arc::clone(&self.session),
            source: self.source.clone(),
            transport: Arc::clone(&self.transport),
            target: Arc::clone(&self.target),
            retry: self.retry,
        }
    }

    /// Records one finished chunk task.
    fn settle(&self, joined: Result<ChunkOutcome, JoinError>) -> Result<(), UploadError> {
        let (index, response) = match joined {
            Ok(outcome) => outcome?,
            Err(e) if e.is_cancelled() => return Err(UploadError::Cancelled),
            Err(e) => return Err(UploadError::Task(e.to_string())),
        };
        if self.session.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let acknowledged = self
            .session
            .acknowledge_chunk(index, response.clone())
            .map_err(|e| {
                if self.session.is_cancelled() {
                    UploadError::Cancelled
                } else {
                    e.into()
                }
            })?;
        let Some(size) = acknowledged else {
            return Ok(());
        };

        let total_chunks = self.session.chunk_count();
        debug!(
            upload_id = %self.session.id(),
            chunk = index,
            total_chunks,
            "chunk acknowledged"
        );
        if let Some(hook) = &self.on_chunk_complete {
            hook(ChunkInfo {
                upload_id: self.session.id().to_string(),
                index,
                total_chunks,
                size,
                response,
            });
        }
        Ok(())
    }
}

/// Everything one chunk task needs, owned so it can be spawned.
struct ChunkJob {
    index: usize,
    range: ByteRange,
    session: Arc<UploadSession>,
    source: UploadSource,
    transport: Arc<dyn Transport>,
    target: Arc<RequestTarget>,
    retry: RetryPolicy,
}

impl ChunkJob {
    async fn run(self) -> ChunkOutcome {
        let payload = self.source.read_range(self.range).await?;
        let metadata = ChunkMetadata {
            index: self.index,
            total_chunks: self.session.chunk_count(),
            file_name: self.session.name().to_string(),
            file_size: self.session.total_bytes(),
            file_type: self.session.mime_type().to_string(),
        };

        let session = &*self.session;
        let transport: &dyn Transport = &*self.transport;
        let response = self
            .retry
            .run(session, self.index, |_attempt| {
                transport.send(TransferRequest {
                    target: Arc::clone(&self.target),
                    payload: payload.clone(),
                    file_name: session.name().to_string(),
                    mime_type: session.mime_type().to_string(),
                    chunk: Some(metadata.clone()),
                    cancel: session.request_token(),
                    progress: None,
                })
            })
            .await?;

        Ok((self.index, response))
    }
}
