//! Runs one upload from start to a terminal state.

use std::sync::Arc;

use chunklift_protocol::{ServerResponse, UploadResponse};
use chunklift_transfer::{ProgressTracker, UploadSession, UploadSource};
use tracing::{error, info};

use crate::retry::RetryPolicy;
use crate::scheduler::ChunkScheduler;
use crate::transport::{RequestTarget, TransferRequest, Transport};
use crate::{UploadError, UploadHooks, UploadOptions};

/// Drives a registered session: picks the path, keeps the progress tracker
/// alive for the run, and fires the terminal hooks.
///
/// `on_cancel` is not fired here; it belongs to whoever cancels.
pub(crate) struct SessionController {
    session: Arc<UploadSession>,
    source: UploadSource,
    options: Arc<UploadOptions>,
    hooks: UploadHooks,
    transport: Arc<dyn Transport>,
}

impl SessionController {
    pub fn new(
        session: Arc<UploadSession>,
        source: UploadSource,
        options: Arc<UploadOptions>,
        hooks: UploadHooks,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            session,
            source,
            options,
            hooks,
            transport,
        }
    }

    pub async fn run(self) -> Result<UploadResponse, UploadError> {
        let id = self.session.id().to_string();
        if let Err(err) = self.session.start() {
            // Cancelled before the task got to run.
            if self.session.is_cancelled() {
                return Err(UploadError::Cancelled);
            }
            return Err(err.into());
        }
        info!(
            upload_id = %id,
            file = %self.session.name(),
            total_bytes = self.session.total_bytes(),
            chunks = self.session.chunk_count(),
            "upload started"
        );
        if let Some(hook) = &self.hooks.on_start {
            hook(&id);
        }

        let tracker = match &self.hooks.on_progress {
            Some(callback) if self.options.report_progress => Some(ProgressTracker::start(
                Arc::clone(&self.session),
                Some(self.options.progress_interval),
                Arc::clone(callback),
            )),
            _ => None,
        };

        let target = Arc::new(RequestTarget::from(&*self.options));
        let outcome = if self.session.is_chunked() {
            self.run_chunked(target).await
        } else {
            self.run_whole_file(target).await
        };
        let outcome = outcome.and_then(|response| {
            self.session.complete()?;
            Ok(response)
        });

        match outcome {
            Ok(server) => {
                if let Some(tracker) = tracker {
                    tracker.finish().await;
                }
                let response = self.response(server);
                info!(
                    upload_id = %id,
                    upload_time_ms = response.upload_time_ms,
                    chunks = response.chunks_uploaded,
                    "upload completed"
                );
                if let Some(hook) = &self.hooks.on_complete {
                    hook(&response);
                }
                Ok(response)
            }
            Err(err) => {
                // `fail` and `cancel` race on the session lock; whichever
                // lands first decides which terminal hook fires.
                let failed = self.session.fail(&err.to_string());
                drop(tracker);
                if failed.is_err() && self.session.is_cancelled() {
                    info!(upload_id = %id, "upload cancelled");
                    return Err(UploadError::Cancelled);
                }
                error!(upload_id = %id, error = %err, "upload failed");
                if let Some(hook) = &self.hooks.on_error {
                    hook(&err);
                }
                Err(err)
            }
        }
    }

    async fn run_chunked(&self, target: Arc<RequestTarget>) -> Result<ServerResponse, UploadError> {
        ChunkScheduler::new(
            Arc::clone(&self.session),
            self.source.clone(),
            Arc::clone(&self.transport),
            target,
            RetryPolicy::from(&*self.options),
            self.options.max_concurrent_chunks,
        )
        .with_chunk_hook(self.hooks.on_chunk_complete.clone())
        .run()
        .await?;

        self.session
            .final_chunk_response()
            .ok_or_else(|| UploadError::Task("last chunk has no response".into()))
    }

    /// Sends the whole payload in one request. There is no retry on this
    /// path; a failure fails the upload.
    async fn run_whole_file(
        &self,
        target: Arc<RequestTarget>,
    ) -> Result<ServerResponse, UploadError> {
        self.session.checkpoint().await?;
        let payload = self.source.read_all().await?;

        let session = Arc::clone(&self.session);
        let request = TransferRequest {
            target,
            payload,
            file_name: self.session.name().to_string(),
            mime_type: self.session.mime_type().to_string(),
            chunk: None,
            cancel: self.session.request_token(),
            progress: Some(Arc::new(move |bytes| session.add_streamed_bytes(bytes))),
        };
        self.transport.send(request).await
    }

    fn response(&self, server: ServerResponse) -> UploadResponse {
        let elapsed = self.session.elapsed();
        let secs = elapsed.as_secs_f64();
        let average_speed = if secs > 0.0 {
            self.session.total_bytes() as f64 / secs
        } else {
            0.0
        };

        UploadResponse {
            upload_id: self.session.id().to_string(),
            status: server.status,
            headers: server.headers,
            body: server.body,
            upload_time_ms: elapsed.as_millis() as u64,
            average_speed,
            success: true,
            error: None,
            chunks_uploaded: self.session.uploaded_chunk_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use chunklift_protocol::{UploadProgress, UploadStatus};
    use chunklift_transfer::plan_chunks;

    use crate::testing::MockTransport;

    fn options(chunk_size: u64) -> Arc<UploadOptions> {
        let mut opts = UploadOptions::new("http://localhost/upload");
        opts.chunk_size = chunk_size;
        opts.retry_delay = Duration::from_millis(100);
        opts.progress_interval = Duration::from_millis(50);
        Arc::new(opts)
    }

    fn controller(
        size: usize,
        opts: Arc<UploadOptions>,
        hooks: UploadHooks,
        transport: &Arc<MockTransport>,
    ) -> (SessionController, Arc<UploadSession>) {
        let source = UploadSource::from_bytes("photo.jpg", vec![3u8; size]);
        let plan = if opts.should_chunk(source.size()) {
            plan_chunks(source.size(), opts.chunk_size)
        } else {
            Vec::new()
        };
        let session = Arc::new(UploadSession::new("u1".into(), &source, plan));
        let controller = SessionController::new(
            Arc::clone(&session),
            source,
            opts,
            hooks,
            Arc::clone(transport) as Arc<dyn Transport>,
        );
        (controller, session)
    }

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[tokio::test(start_paused = true)]
    async fn chunked_upload_completes() {
        let transport = Arc::new(MockTransport::new(Duration::from_millis(200)));
        let progress = Arc::new(Mutex::new(Vec::<UploadProgress>::new()));
        let completes = counter();
        let errors = counter();

        let hooks = UploadHooks::default()
            .on_progress({
                let progress = Arc::clone(&progress);
                move |p| progress.lock().unwrap().push(p)
            })
            .on_complete({
                let completes = Arc::clone(&completes);
                move |_| {
                    completes.fetch_add(1, Ordering::SeqCst);
                }
            })
            .on_error({
                let errors = Arc::clone(&errors);
                move |_| {
                    errors.fetch_add(1, Ordering::SeqCst);
                }
            });

        let (ctl, session) = controller(25, options(10), hooks, &transport);
        let response = ctl.run().await.unwrap();

        assert!(response.success);
        assert_eq!(response.status, 200);
        assert_eq!(response.chunks_uploaded, 3);
        // Final response comes from the highest-index chunk.
        assert_eq!(response.body.as_json().unwrap()["chunk"], 2);
        assert_eq!(response.body.as_json().unwrap()["bytes"], 5);
        assert_eq!(session.status(), UploadStatus::Completed);
        assert_eq!(completes.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 0);

        let progress = progress.lock().unwrap();
        let last = progress.last().unwrap();
        assert_eq!(last.progress, 100.0);
        assert_eq!(last.uploaded_bytes, 25);
        assert_eq!(last.current_chunk, Some(3));
        for pair in progress.windows(2) {
            assert!(pair[1].uploaded_bytes >= pair[0].uploaded_bytes);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn small_file_goes_out_whole() {
        let transport = Arc::new(MockTransport::new(Duration::from_millis(10)));
        let (ctl, session) = controller(8, options(10), UploadHooks::default(), &transport);
        let response = ctl.run().await.unwrap();

        assert_eq!(transport.calls(), vec![None]);
        assert_eq!(response.chunks_uploaded, 0);
        assert_eq!(session.uploaded_bytes(), 8);
        assert!(!session.is_chunked());
    }

    #[tokio::test(start_paused = true)]
    async fn chunking_disabled_sends_whole_file() {
        let transport = Arc::new(MockTransport::new(Duration::from_millis(10)));
        let mut opts = (*options(10)).clone();
        opts.use_chunked_upload = false;
        let (ctl, _session) = controller(100, Arc::new(opts), UploadHooks::default(), &transport);
        ctl.run().await.unwrap();
        assert_eq!(transport.calls(), vec![None]);
    }

    #[tokio::test(start_paused = true)]
    async fn whole_file_failure_is_not_retried() {
        let transport = Arc::new(
            MockTransport::new(Duration::from_millis(10)).fail_whole_file(UploadError::Timeout),
        );
        let errors = counter();
        let hooks = UploadHooks::default().on_error({
            let errors = Arc::clone(&errors);
            move |err| {
                assert!(matches!(err, UploadError::Timeout));
                errors.fetch_add(1, Ordering::SeqCst);
            }
        });

        let (ctl, session) = controller(8, options(10), hooks, &transport);
        let err = ctl.run().await.unwrap_err();

        assert!(matches!(err, UploadError::Timeout));
        assert_eq!(transport.calls().len(), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(session.status(), UploadStatus::Failed);
        assert!(session.error().unwrap().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_chunk_fails_the_upload_once() {
        let transport =
            Arc::new(MockTransport::new(Duration::from_millis(10)).fail_chunk(1, u32::MAX));
        let errors = counter();
        let completes = counter();
        let hooks = UploadHooks::default()
            .on_error({
                let errors = Arc::clone(&errors);
                move |_| {
                    errors.fetch_add(1, Ordering::SeqCst);
                }
            })
            .on_complete({
                let completes = Arc::clone(&completes);
                move |_| {
                    completes.fetch_add(1, Ordering::SeqCst);
                }
            });

        let mut opts = (*options(10)).clone();
        opts.max_retries = 3;
        let (ctl, session) = controller(30, Arc::new(opts), hooks, &transport);
        let err = ctl.run().await.unwrap_err();

        assert!(matches!(
            err,
            UploadError::RetryExhausted {
                chunk_index: 1,
                attempts: 4,
                ..
            }
        ));
        assert_eq!(transport.attempts_for(1), 4);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(completes.load(Ordering::SeqCst), 0);
        assert_eq!(session.status(), UploadStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_fires_no_terminal_hook() {
        let transport = Arc::new(MockTransport::new(Duration::from_millis(500)));
        let fired = counter();
        let hooks = UploadHooks::default()
            .on_error({
                let fired = Arc::clone(&fired);
                move |_| {
                    fired.fetch_add(1, Ordering::SeqCst);
                }
            })
            .on_complete({
                let fired = Arc::clone(&fired);
                move |_| {
                    fired.fetch_add(1, Ordering::SeqCst);
                }
            });

        let (ctl, session) = controller(50, options(10), hooks, &transport);
        let canceller = Arc::clone(&session);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let err = ctl.run().await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(session.status(), UploadStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start_sends_nothing() {
        let transport = Arc::new(MockTransport::new(Duration::from_millis(10)));
        let started = counter();
        let hooks = UploadHooks::default().on_start({
            let started = Arc::clone(&started);
            move |_| {
                started.fetch_add(1, Ordering::SeqCst);
            }
        });

        let (ctl, session) = controller(50, options(10), hooks, &transport);
        assert!(session.cancel());
        assert!(ctl.run().await.unwrap_err().is_cancelled());
        assert!(transport.calls().is_empty());
        assert_eq!(started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn start_hook_fires_before_any_request() {
        let transport = Arc::new(MockTransport::new(Duration::from_millis(10)));
        let seen_calls = Arc::new(Mutex::new(None));
        let hooks = UploadHooks::default().on_start({
            let transport = Arc::clone(&transport);
            let seen_calls = Arc::clone(&seen_calls);
            move |id| {
                assert_eq!(id, "u1");
                *seen_calls.lock().unwrap() = Some(transport.calls().len());
            }
        });

        let (ctl, _session) = controller(30, options(10), hooks, &transport);
        ctl.run().await.unwrap();
        assert_eq!(*seen_calls.lock().unwrap(), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn progress_disabled_emits_nothing() {
        let transport = Arc::new(MockTransport::new(Duration::from_millis(200)));
        let ticks = counter();
        let hooks = UploadHooks::default().on_progress({
            let ticks = Arc::clone(&ticks);
            move |_| {
                ticks.fetch_add(1, Ordering::SeqCst);
            }
        });
        let mut opts = (*options(10)).clone();
        opts.report_progress = false;

        let (ctl, _session) = controller(30, Arc::new(opts), hooks, &transport);
        ctl.run().await.unwrap();
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }
}
