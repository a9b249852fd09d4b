//! In-memory transport shared by the unit tests.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chunklift_protocol::{ResponseBody, ServerResponse};

use crate::UploadError;
use crate::transport::{TransferRequest, Transport};

/// Records every request and answers after a per-chunk delay.
///
/// Chunk `i` takes `delay + i * stagger`, so settlement order is fixed.
#[derive(Default)]
pub(crate) struct MockTransport {
    pub delay: Duration,
    pub stagger: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    /// Chunk index (`None` for whole-file requests) of every attempt, in
    /// dispatch order.
    calls: Mutex<Vec<Option<usize>>>,
    /// Remaining failures per chunk index. `u32::MAX` never recovers.
    failures: Mutex<HashMap<usize, u32>>,
    whole_file_failure: Mutex<Option<UploadError>>,
}

impl MockTransport {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn with_stagger(mut self, stagger: Duration) -> Self {
        self.stagger = stagger;
        self
    }

    /// Chunk `index` fails `times` times before succeeding.
    pub fn fail_chunk(self, index: usize, times: u32) -> Self {
        self.failures.lock().unwrap().insert(index, times);
        self
    }

    pub fn fail_whole_file(self, err: UploadError) -> Self {
        *self.whole_file_failure.lock().unwrap() = Some(err);
        self
    }

    pub fn calls(&self) -> Vec<Option<usize>> {
        self.calls.lock().unwrap().clone()
    }

    /// Attempts made for chunk `index`.
    pub fn attempts_for(&self, index: usize) -> usize {
        self.calls()
            .iter()
            .filter(|c| **c == Some(index))
            .count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn handle(&self, request: TransferRequest) -> Result<ServerResponse, UploadError> {
        let index = request.chunk.as_ref().map(|c| c.index);
        self.calls.lock().unwrap().push(index);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.delay + self.stagger * index.unwrap_or(0) as u32;
        let outcome = tokio::select! {
            _ = request.cancel.cancelled() => Err(UploadError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome?;

        match index {
            Some(i) => {
                let mut failures = self.failures.lock().unwrap();
                if let Some(left) = failures.get_mut(&i)
                    && *left > 0
                {
                    if *left != u32::MAX {
                        *left -= 1;
                    }
                    return Err(UploadError::Transport {
                        status: 500,
                        body: format!("chunk {i} rejected"),
                    });
                }
            }
            None => {
                if let Some(err) = self.whole_file_failure.lock().unwrap().take() {
                    return Err(err);
                }
                if let Some(progress) = &request.progress {
                    progress(request.payload.len() as u64);
                }
            }
        }

        Ok(ServerResponse {
            status: 200,
            headers: Default::default(),
            body: ResponseBody::Json(serde_json::json!({
                "chunk": index,
                "bytes": request.payload.len(),
            })),
        })
    }
}

impl Transport for MockTransport {
    fn send(
        &self,
        request: TransferRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ServerResponse, UploadError>> + Send + '_>> {
        Box::pin(self.handle(request))
    }
}
