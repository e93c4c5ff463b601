use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

pub const PROGRESS_REPORT_MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Capacity of the channel carrying updates from the registry writer.
pub const UPDATE_CHANNEL_CAPACITY: usize = 200;

/// The writer and the orchestrator may each post one outcome.
pub const RESULT_CHANNEL_CAPACITY: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    Progress { complete: u64, total: u64 },
    Failed(String),
}

/// Writer side of the update channel. Clones share the byte counter, so
/// concurrent blob uploads report one running total.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    updates: mpsc::Sender<Update>,
    complete: Arc<AtomicU64>,
    total: u64,
}

impl ProgressSink {
    pub fn new(updates: mpsc::Sender<Update>, total: u64) -> ProgressSink {
        ProgressSink {
            updates,
            complete: Arc::new(AtomicU64::new(0)),
            total,
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub async fn advance(&self, bytes: u64) {
        if bytes == 0 {
            return;
        }
        let complete = self.complete.fetch_add(bytes, Ordering::SeqCst) + bytes;
        // a closed channel means the orchestrator stopped listening, the write carries on
        let _ = self
            .updates
            .send(Update::Progress {
                complete,
                total: self.total,
            })
            .await;
    }

    pub async fn fail(&self, error: &anyhow::Error) {
        let _ = self.updates.send(Update::Failed(format!("{:#}", error))).await;
    }

    /// Tracks one blob of `size` bytes. Clones share the high-water mark, so
    /// a body that is sent again after a challenge or redirect is not counted twice.
    pub fn upload(&self, size: u64) -> UploadProgress {
        UploadProgress {
            sink: self.clone(),
            sent: Arc::new(AtomicU64::new(0)),
            size,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadProgress {
    sink: ProgressSink,
    sent: Arc<AtomicU64>,
    size: u64,
}

impl UploadProgress {
    /// Records that the body has been streamed up to `offset`. Only bytes past
    /// the furthest offset seen so far advance the sink.
    pub async fn reached(&self, offset: u64) {
        let offset = offset.min(self.size);
        let previous = self.sent.fetch_max(offset, Ordering::SeqCst);
        if offset > previous {
            self.sink.advance(offset - previous).await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reported {
    Completed,
    Progress,
    Suppressed,
}

/// Throttles progress logging to one line per debounce window; the completion
/// line is always logged.
#[derive(Debug)]
pub struct ProgressReporter {
    debounce: Duration,
    next_progress: Instant,
}

impl ProgressReporter {
    pub fn new(debounce: Duration) -> ProgressReporter {
        ProgressReporter {
            debounce,
            next_progress: Instant::now() + debounce,
        }
    }

    pub fn report(&mut self, complete: u64, total: u64) -> Reported {
        if complete == total {
            tracing::info!(completed = complete, total = total, "pushed");
            return Reported::Completed;
        }
        let now = Instant::now();
        if now > self.next_progress {
            self.next_progress = now + self.debounce;
            tracing::info!(completed = complete, total = total, "push");
            Reported::Progress
        } else {
            Reported::Suppressed
        }
    }
}

/// Drains `updates` until the writer closes the channel, logging through
/// `reporter`. A failed update is forwarded to `results` and ends the drain.
pub async fn drain_updates(
    updates: &mut mpsc::Receiver<Update>,
    results: &mpsc::Sender<Result<(), anyhow::Error>>,
    reporter: &mut ProgressReporter,
) {
    while let Some(update) = updates.recv().await {
        match update {
            Update::Failed(message) => {
                tracing::error!(error = %message, "push update");
                let _ = results.send(Err(anyhow::anyhow!(message))).await;
                break;
            }
            Update::Progress { complete, total } => {
                reporter.report(complete, total);
            }
        }
    }
}
