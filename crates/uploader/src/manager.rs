//! Caller-owned table of active uploads.
//!
//! [`UploadManager::start`] runs the pre-flight steps, registers a session
//! under a fresh id and spawns its run. The returned [`UploadHandle`]
//! controls that one upload; the manager controls any of them by id.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chunklift_protocol::{UploadProgress, UploadResponse, UploadStatus};
use chunklift_transfer::{
    Compressor, FileValidator, LimitsValidator, SessionEvent, UploadSession, UploadSource,
    plan_chunks,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::controller::SessionController;
use crate::options::CancelHook;
use crate::transport::{HttpTransport, Transport};
use crate::{UploadError, UploadHooks, UploadOptions};

type Registry = Arc<RwLock<HashMap<String, Arc<UploadEntry>>>>;

struct UploadEntry {
    session: Arc<UploadSession>,
    on_cancel: Option<CancelHook>,
}

impl UploadEntry {
    /// Cancels the session and fires `on_cancel` the first time only.
    fn cancel(&self) -> bool {
        if !self.session.cancel() {
            return false;
        }
        info!(upload_id = %self.session.id(), "upload cancel requested");
        if let Some(hook) = &self.on_cancel {
            hook(self.session.id());
        }
        true
    }
}

/// Removes an upload from the registry when its task ends, however it ends.
struct Deregister {
    uploads: Registry,
    id: String,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        if let Ok(mut uploads) = self.uploads.write() {
            uploads.remove(&self.id);
        }
    }
}

/// Starts uploads and tracks the ones still running.
#[derive(Clone)]
pub struct UploadManager {
    transport: Arc<dyn Transport>,
    validator: Arc<dyn FileValidator>,
    compressor: Option<Arc<dyn Compressor>>,
    uploads: Registry,
}

impl UploadManager {
    /// Creates a manager that uploads over HTTP.
    pub fn new() -> Result<Self, UploadError> {
        Ok(Self::with_transport(Arc::new(HttpTransport::new()?)))
    }

    /// Creates a manager on top of a custom transport.
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            validator: Arc::new(LimitsValidator),
            compressor: None,
            uploads: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Replaces the default [`LimitsValidator`].
    pub fn with_validator(mut self, validator: Arc<dyn FileValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    /// Uploads `source` and waits for the outcome.
    pub async fn upload_file(
        &self,
        source: UploadSource,
        options: UploadOptions,
        hooks: UploadHooks,
    ) -> Result<UploadResponse, UploadError> {
        // Nobody can read events here, so the session gets no sink.
        self.launch(source, options, hooks, false).await?.wait().await
    }

    /// Runs the pre-flight steps and spawns the upload.
    ///
    /// Pre-flight failures (options, validation, compression) fire
    /// `on_error` and return before any request is made.
    pub async fn start(
        &self,
        source: UploadSource,
        options: UploadOptions,
        hooks: UploadHooks,
    ) -> Result<UploadHandle, UploadError> {
        self.launch(source, options, hooks, true).await
    }

    async fn launch(
        &self,
        source: UploadSource,
        options: UploadOptions,
        hooks: UploadHooks,
        with_events: bool,
    ) -> Result<UploadHandle, UploadError> {
        let source = match self.preflight(source, &options).await {
            Ok(source) => source,
            Err(err) => {
                warn!(error = %err, "upload rejected before start");
                if let Some(hook) = &hooks.on_error {
                    hook(&err);
                }
                return Err(err);
            }
        };

        let plan = if options.should_chunk(source.size()) {
            plan_chunks(source.size(), options.chunk_size)
        } else {
            Vec::new()
        };
        let id = Uuid::new_v4().to_string();
        let mut session = UploadSession::new(id.clone(), &source, plan);
        let events = if with_events {
            let (tx, rx) = mpsc::unbounded_channel();
            session = session.with_event_sink(tx);
            Some(rx)
        } else {
            None
        };
        let session = Arc::new(session);

        let entry = Arc::new(UploadEntry {
            session: Arc::clone(&session),
            on_cancel: hooks.on_cancel.clone(),
        });
        self.uploads
            .write()
            .unwrap()
            .insert(id.clone(), Arc::clone(&entry));
        debug!(upload_id = %id, chunks = session.chunk_count(), "upload registered");

        let controller = SessionController::new(
            Arc::clone(&session),
            source,
            Arc::new(options),
            hooks,
            Arc::clone(&self.transport),
        );
        let guard = Deregister {
            uploads: Arc::clone(&self.uploads),
            id: id.clone(),
        };
        let task = tokio::spawn(async move {
            let _guard = guard;
            controller.run().await
        });

        Ok(UploadHandle {
            id,
            entry,
            uploads: Arc::clone(&self.uploads),
            task,
            events,
        })
    }

    async fn preflight(
        &self,
        source: UploadSource,
        options: &UploadOptions,
    ) -> Result<UploadSource, UploadError> {
        options.validate()?;

        if options.validate {
            let report = self.validator.validate(&source, &options.validation).await;
            for warning in &report.warnings {
                warn!(file = %source.name(), "{warning}");
            }
            if !report.is_valid() {
                return Err(UploadError::Validation(report.errors));
            }
        }

        let Some(settings) = &options.compress else {
            return Ok(source);
        };
        let Some(compressor) = &self.compressor else {
            warn!(file = %source.name(), "compression requested but no compressor configured");
            return Ok(source);
        };
        let before = source.size();
        let compressed = compressor
            .compress(source, settings)
            .await
            .map_err(UploadError::Compression)?;
        debug!(
            file = %compressed.name(),
            before,
            after = compressed.size(),
            "source compressed"
        );
        Ok(compressed)
    }

    fn entry(&self, id: &str) -> Option<Arc<UploadEntry>> {
        self.uploads.read().unwrap().get(id).cloned()
    }

    /// Pauses an upload. Returns `false` for an unknown or finished upload.
    pub fn pause_upload(&self, id: &str) -> bool {
        self.entry(id).is_some_and(|e| e.session.pause())
    }

    /// Resumes an upload. Returns `false` for an unknown or finished upload.
    pub fn resume_upload(&self, id: &str) -> bool {
        self.entry(id).is_some_and(|e| e.session.resume())
    }

    /// Cancels an upload and removes it from the table.
    pub fn cancel_upload(&self, id: &str) -> bool {
        let entry = self.uploads.write().unwrap().remove(id);
        entry.is_some_and(|e| e.cancel())
    }

    pub fn get_upload_progress(&self, id: &str) -> Option<UploadProgress> {
        self.entry(id).map(|e| e.session.progress())
    }

    /// Ids of uploads that have not finished yet.
    pub fn active_uploads(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.uploads.read().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Control surface for one running upload.
///
/// Dropping the handle does not stop the upload.
pub struct UploadHandle {
    id: String,
    entry: Arc<UploadEntry>,
    uploads: Registry,
    task: JoinHandle<Result<UploadResponse, UploadError>>,
    events: Option<mpsc::UnboundedReceiver<SessionEvent>>,
}

impl UploadHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pause(&self) -> bool {
        self.entry.session.pause()
    }

    pub fn resume(&self) -> bool {
        self.entry.session.resume()
    }

    /// Cancels the upload. Returns `false` if it already ended.
    pub fn cancel(&self) -> bool {
        self.uploads.write().unwrap().remove(&self.id);
        self.entry.cancel()
    }

    pub fn progress(&self) -> UploadProgress {
        self.entry.session.progress()
    }

    pub fn status(&self) -> UploadStatus {
        self.entry.session.status()
    }

    /// Takes the session event receiver. Can only be called once, and
    /// returns `None` for handles created by [`UploadManager::upload_file`].
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events.take()
    }

    /// Waits for the upload to reach a terminal state.
    pub async fn wait(self) -> Result<UploadResponse, UploadError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(UploadError::Cancelled),
            Err(e) => Err(UploadError::Task(e.to_string())),
        }
    }
}

impl std::fmt::Debug for UploadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadHandle")
            .field("id", &self.id)
            .field("session", &self.entry.session)
            .finish()
    }
}
