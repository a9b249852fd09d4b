use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chunklift_protocol::{ServerResponse, UploadProgress, UploadStatus};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::progress::compute_progress;
use crate::state::{SessionEvent, next_status};
use crate::{ByteRange, TransferError, UploadSource};

/// One byte-range slice of an upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadChunk {
    /// Zero-based position, stable for the session.
    pub index: usize,
    pub range: ByteRange,
    /// Server reply, present once the chunk has been acknowledged.
    pub response: Option<ServerResponse>,
}

impl UploadChunk {
    /// Returns `true` once the server acknowledged this chunk.
    pub fn uploaded(&self) -> bool {
        self.response.is_some()
    }

    /// Size of the chunk in bytes.
    pub fn size(&self) -> u64 {
        self.range.len()
    }
}

/// Tracks one upload (thread-safe).
///
/// Chunk workers run as separate tasks, so all mutable state sits behind a
/// lock. Pause is a `watch` flag so waiters wake as soon as it clears;
/// cancellation is terminal and also revokes every token handed out by
/// [`request_token`](Self::request_token).
pub struct UploadSession {
    id: String,
    name: String,
    mime_type: String,
    total_bytes: u64,
    cancel: CancellationToken,
    cancelled: AtomicBool,
    paused: watch::Sender<bool>,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
    inner: RwLock<SessionInner>,
}

struct SessionInner {
    status: UploadStatus,
    uploaded_bytes: u64,
    chunked: bool,
    chunks: Vec<UploadChunk>,
    started_at: Option<Instant>,
    completed_at: Option<Instant>,
    error: Option<String>,
}

impl UploadSession {
    /// Creates a session for `source`.
    ///
    /// An empty `plan` means the whole file goes out in a single request.
    pub fn new(id: String, source: &UploadSource, plan: Vec<ByteRange>) -> Self {
        let chunked = !plan.is_empty();
        let chunks = plan
            .into_iter()
            .enumerate()
            .map(|(index, range)| UploadChunk {
                index,
                range,
                response: None,
            })
            .collect();
        let (paused, _) = watch::channel(false);

        Self {
            id,
            name: source.name().to_string(),
            mime_type: source.mime_type().to_string(),
            total_bytes: source.size(),
            cancel: CancellationToken::new(),
            cancelled: AtomicBool::new(false),
            paused,
            events: None,
            inner: RwLock::new(SessionInner {
                status: UploadStatus::Created,
                uploaded_bytes: 0,
                chunked,
                chunks,
                started_at: None,
                completed_at: None,
                error: None,
            }),
        }
    }

    /// Forwards every applied transition to `tx`.
    pub fn with_event_sink(mut self, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Applies a transition. Must be called with the write lock held so the
    /// status change and the event stay in order.
    fn apply(
        &self,
        inner: &mut SessionInner,
        event: SessionEvent,
    ) -> Result<UploadStatus, TransferError> {
        let next = next_status(inner.status, &event)?;
        trace!(upload_id = %self.id, event = event.name(), status = ?next, "session transition");
        inner.status = next;
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
        Ok(next)
    }

    /// Marks the session as running.
    pub fn start(&self) -> Result<(), TransferError> {
        let mut s = self.inner.write().unwrap();
        self.apply(&mut s, SessionEvent::Started)?;
        s.started_at = Some(Instant::now());
        if *self.paused.borrow() {
            self.apply(&mut s, SessionEvent::Paused)?;
        }
        Ok(())
    }

    /// Requests a pause. Returns `false` if the session already ended.
    pub fn pause(&self) -> bool {
        let mut s = self.inner.write().unwrap();
        if s.status.is_terminal() || self.is_cancelled() {
            return false;
        }
        if self.paused.send_replace(true) {
            return true;
        }
        self.apply(&mut s, SessionEvent::Paused).is_ok()
    }

    /// Clears a pause. Returns `false` if the session already ended.
    pub fn resume(&self) -> bool {
        let mut s = self.inner.write().unwrap();
        if s.status.is_terminal() || self.is_cancelled() {
            return false;
        }
        if !self.paused.send_replace(false) {
            return true;
        }
        self.apply(&mut s, SessionEvent::Resumed).is_ok()
    }

    /// Cancels the session and aborts every outstanding request token.
    ///
    /// Returns `true` only for the call that actually cancelled it.
    pub fn cancel(&self) -> bool {
        let mut s = self.inner.write().unwrap();
        if s.status.is_terminal() || self.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _ = self.apply(&mut s, SessionEvent::Cancelled);
        s.completed_at = Some(Instant::now());
        drop(s);
        self.cancel.cancel();
        true
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns a token for one request. Cancelling the session cancels it.
    pub fn request_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Resolves when the session token is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Waits while the session is paused; fails once it is cancelled.
    ///
    /// Called before every dispatch, attempt and retry wait.
    pub async fn checkpoint(&self) -> Result<(), TransferError> {
        let mut paused = self.paused.subscribe();
        loop {
            if self.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            if !*paused.borrow_and_update() {
                return Ok(());
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
                changed = paused.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Records bytes streamed out on the whole-file path.
    pub fn add_streamed_bytes(&self, bytes: u64) {
        let mut s = self.inner.write().unwrap();
        s.uploaded_bytes = s.uploaded_bytes.saturating_add(bytes).min(self.total_bytes);
    }

    /// Marks chunk `index` as acknowledged by the server.
    ///
    /// Returns the chunk size the first time, `None` if it was already
    /// acknowledged.
    pub fn acknowledge_chunk(
        &self,
        index: usize,
        response: ServerResponse,
    ) -> Result<Option<u64>, TransferError> {
        let mut s = self.inner.write().unwrap();
        let chunk = s.chunks.get(index).ok_or(TransferError::UnknownChunk(index))?;
        if chunk.uploaded() {
            return Ok(None);
        }
        let bytes = chunk.size();
        self.apply(&mut s, SessionEvent::ChunkSucceeded { index, bytes })?;
        s.chunks[index].response = Some(response);
        s.uploaded_bytes = s.uploaded_bytes.saturating_add(bytes).min(self.total_bytes);
        Ok(Some(bytes))
    }

    /// Records a failed attempt for chunk `index`.
    pub fn record_chunk_failure(&self, index: usize, attempt: u32, error: &str) {
        let mut s = self.inner.write().unwrap();
        let _ = self.apply(
            &mut s,
            SessionEvent::ChunkFailed {
                index,
                attempt,
                error: error.to_string(),
            },
        );
    }

    /// Marks the session as completed.
    pub fn complete(&self) -> Result<(), TransferError> {
        let mut s = self.inner.write().unwrap();
        self.apply(&mut s, SessionEvent::AllChunksDone)?;
        s.uploaded_bytes = self.total_bytes;
        s.completed_at = Some(Instant::now());
        Ok(())
    }

    /// Marks the session as failed with an error message.
    pub fn fail(&self, err: &str) -> Result<(), TransferError> {
        let mut s = self.inner.write().unwrap();
        self.apply(
            &mut s,
            SessionEvent::Failed {
                error: err.to_string(),
            },
        )?;
        s.error = Some(err.to_string());
        s.completed_at = Some(Instant::now());
        Ok(())
    }

    /// Returns the current progress snapshot.
    pub fn progress(&self) -> UploadProgress {
        let s = self.inner.read().unwrap();
        compute_progress(
            &self.id,
            s.status,
            self.total_bytes,
            s.uploaded_bytes,
            Self::elapsed_locked(&s),
            self.is_paused(),
            s.chunked.then(|| Self::chunk_counts_locked(&s)),
        )
    }

    /// Returns the terminal snapshot: everything uploaded, nothing remaining.
    pub fn final_progress(&self) -> UploadProgress {
        let mut p = self.progress();
        p.uploaded_bytes = self.total_bytes;
        p.progress = 100.0;
        p.time_remaining_ms = Some(0);
        if let Some(total) = p.total_chunks {
            p.current_chunk = Some(total);
        }
        p
    }

    /// Indices and ranges of chunks not yet acknowledged, in index order.
    pub fn pending_chunks(&self) -> Vec<(usize, ByteRange)> {
        let s = self.inner.read().unwrap();
        s.chunks
            .iter()
            .filter(|c| !c.uploaded())
            .map(|c| (c.index, c.range))
            .collect()
    }

    /// Returns a copy of the chunk table.
    pub fn chunks(&self) -> Vec<UploadChunk> {
        let s = self.inner.read().unwrap();
        s.chunks.clone()
    }

    /// Response of the highest-index chunk, once it has been acknowledged.
    pub fn final_chunk_response(&self) -> Option<ServerResponse> {
        let s = self.inner.read().unwrap();
        s.chunks.last().and_then(|c| c.response.clone())
    }

    /// Wall-clock time since start, frozen once the session ends.
    pub fn elapsed(&self) -> Duration {
        let s = self.inner.read().unwrap();
        Self::elapsed_locked(&s)
    }

    fn elapsed_locked(s: &SessionInner) -> Duration {
        match (s.started_at, s.completed_at) {
            (Some(start), Some(end)) => end.duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    fn chunk_counts_locked(s: &SessionInner) -> (usize, usize) {
        let done = s.chunks.iter().filter(|c| c.uploaded()).count();
        (done, s.chunks.len())
    }

    /// Returns the session ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name of the file being uploaded.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Returns total bytes to transfer.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Returns bytes acknowledged (chunked) or streamed (whole file) so far.
    pub fn uploaded_bytes(&self) -> u64 {
        let s = self.inner.read().unwrap();
        s.uploaded_bytes
    }

    /// Returns the current status.
    pub fn status(&self) -> UploadStatus {
        let s = self.inner.read().unwrap();
        s.status
    }

    /// Returns `true` while the session has not reached a terminal state.
    pub fn is_active(&self) -> bool {
        !self.status().is_terminal()
    }

    /// Returns `true` if the session uploads in chunks.
    pub fn is_chunked(&self) -> bool {
        let s = self.inner.read().unwrap();
        s.chunked
    }

    /// Number of planned chunks (0 for a whole-file upload).
    pub fn chunk_count(&self) -> usize {
        let s = self.inner.read().unwrap();
        s.chunks.len()
    }

    /// Number of chunks acknowledged so far.
    pub fn uploaded_chunk_count(&self) -> usize {
        let s = self.inner.read().unwrap();
        Self::chunk_counts_locked(&s).0
    }

    /// Failure message, if the session failed.
    pub fn error(&self) -> Option<String> {
        let s = self.inner.read().unwrap();
        s.error.clone()
    }
}

impl std::fmt::Debug for UploadSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadSession")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("total_bytes", &self.total_bytes)
            .field("status", &self.status())
            .field("paused", &self.is_paused())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
