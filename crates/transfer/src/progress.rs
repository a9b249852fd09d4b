use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chunklift_protocol::{UploadProgress, UploadStatus};
use chunklift_protocol::constants::DEFAULT_PROGRESS_INTERVAL;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::UploadSession;

/// Callback invoked with upload progress.
pub type ProgressCallback = Arc<dyn Fn(UploadProgress) + Send + Sync>;

/// Builds a progress snapshot from raw counters.
///
/// `chunk_counts` is `(acknowledged, total)` for chunked uploads.
pub fn compute_progress(
    upload_id: &str,
    status: UploadStatus,
    total_bytes: u64,
    uploaded_bytes: u64,
    elapsed: Duration,
    is_paused: bool,
    chunk_counts: Option<(usize, usize)>,
) -> UploadProgress {
    let uploaded_bytes = uploaded_bytes.min(total_bytes);
    let progress = if total_bytes == 0 {
        if status == UploadStatus::Completed { 100.0 } else { 0.0 }
    } else {
        (uploaded_bytes as f64 / total_bytes as f64 * 100.0).clamp(0.0, 100.0)
    };

    let secs = elapsed.as_secs_f64();
    let speed = if secs > 0.0 {
        uploaded_bytes as f64 / secs
    } else {
        0.0
    };
    let remaining = total_bytes - uploaded_bytes;
    let time_remaining_ms = if remaining == 0 {
        Some(0)
    } else if speed > 0.0 {
        Some((remaining as f64 / speed * 1000.0).round() as u64)
    } else {
        None
    };

    UploadProgress {
        upload_id: upload_id.to_string(),
        status,
        total_bytes,
        uploaded_bytes,
        progress,
        speed,
        time_remaining_ms,
        is_paused,
        current_chunk: chunk_counts.map(|(done, _)| done),
        total_chunks: chunk_counts.map(|(_, total)| total),
    }
}

/// Emits progress snapshots for one session on a fixed interval.
///
/// Ticks are skipped while the session is paused or cancelled. The timer
/// task stops on [`finish`](Self::finish), [`stop`](Self::stop) or drop,
/// so it never outlives the upload. The callback always runs on the timer
/// task with no lock held.
pub struct ProgressTracker {
    /// Set once no more ticks may be emitted.
    closed: Arc<AtomicBool>,
    /// Sending finishes with a final snapshot; dropping stops silently.
    finish: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ProgressTracker {
    /// Starts periodic notifications in a background tokio task.
    ///
    /// If `interval` is `None`, defaults to 500 ms.
    pub fn start(
        session: Arc<UploadSession>,
        interval: Option<Duration>,
        callback: ProgressCallback,
    ) -> Self {
        let interval = interval
            .unwrap_or(DEFAULT_PROGRESS_INTERVAL)
            .max(Duration::from_millis(1));
        let (tx, mut rx) = oneshot::channel::<()>();
        let closed = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn({
            let closed = Arc::clone(&closed);
            async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        biased;
                        msg = &mut rx => {
                            if msg.is_ok() {
                                callback(session.final_progress());
                            }
                            break;
                        }
                        _ = ticker.tick() => {
                            if closed.load(Ordering::SeqCst) {
                                break;
                            }
                            if session.is_paused() || session.is_cancelled() {
                                continue;
                            }
                            callback(session.progress());
                        }
                    }
                }
            }
        });

        Self {
            closed,
            finish: Some(tx),
            task: Some(task),
        }
    }

    /// Stops the timer and emits the terminal 100% snapshot.
    ///
    /// Returns once the snapshot has been delivered; no tick follows it.
    pub async fn finish(mut self) {
        let (Some(tx), Some(task)) = (self.finish.take(), self.task.take()) else {
            return;
        };
        if tx.send(()).is_ok() {
            let _ = task.await;
        }
    }

    /// Stops the timer without a final snapshot.
    ///
    /// A callback already running completes; none starts afterwards.
    pub fn stop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the sender signals the task to exit.
        drop(self.finish.take());
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Returns `true` until the tracker has been stopped.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        self.stop();
    }
}
