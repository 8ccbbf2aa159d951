//! Download/verification pipeline
//!
//! Two long-lived workers connected by a bounded hand-off channel: the
//! fetch stage walks the index sequentially and streams files to disk,
//! the validate stage runs the GDAL check and records the terminal
//! outcome. The channel is deliberately small so verification never
//! falls far behind fetching and the on-disk pile of unverified data
//! stays bounded regardless of index size. A full channel blocks the
//! fetch stage; that backpressure is the only flow control needed.
//!
//! Per-item states: Pending -> Fetching -> {FetchFailed | Queued} ->
//! Validating -> {Completed | ValidateFailed}. Every terminal outcome is
//! persisted through the progress store before the item is considered
//! done, so an interrupt mid-flight only ever leaves items Pending.

use crate::error::AhngetError;
use crate::fetch::Fetcher;
use crate::gdal::GdalTools;
use crate::progress::ProgressStore;
use ahnget_types::{PipelineReport, WorkItem};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Capacity of the fetch -> validate hand-off channel.
pub const QUEUE_CAPACITY: usize = 3;
/// How long the validate stage waits on the channel before re-checking
/// the cancellation signal.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Bounded wait for the validate stage to drain once fetching is done.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(300);

/// Progress notifications for UIs. Best-effort: send errors (no
/// subscribers) are ignored.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    FetchStarted {
        id: String,
        filename: String,
        position: usize,
        total: usize,
        expected_size: u64,
    },
    /// Bytes written by one chunk of the current fetch.
    FetchProgress { id: String, bytes: u64 },
    /// Item handed to the validate stage.
    Queued { id: String, reused_local: bool },
    FetchFailed { id: String, error: String },
    Validated { id: String },
    ValidationFailed { id: String },
}

/// A fetched (or size-matched local) file waiting for validation.
struct QueuedFile {
    id: String,
    path: PathBuf,
    expected_size: u64,
    position: usize,
    total: usize,
}

/// The resumable two-stage download/verify pipeline.
pub struct Pipeline {
    store: Arc<ProgressStore>,
    gdal: Arc<GdalTools>,
    fetcher: Fetcher,
    download_dir: PathBuf,
    cancel: CancellationToken,
    event_tx: broadcast::Sender<PipelineEvent>,
    queue_capacity: usize,
    poll_interval: Duration,
    drain_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        store: Arc<ProgressStore>,
        gdal: Arc<GdalTools>,
        fetcher: Fetcher,
        download_dir: PathBuf,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            store,
            gdal,
            fetcher,
            download_dir,
            cancel: CancellationToken::new(),
            event_tx,
            queue_capacity: QUEUE_CAPACITY,
            poll_interval: POLL_INTERVAL,
            drain_timeout: DRAIN_TIMEOUT,
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Shared cancellation signal. Raising it stops the fetch stage at
    /// the next item boundary and the validate stage at its next poll.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Subscribe to pipeline events.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: PipelineEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Run the pipeline over `items` in index order. Items the store
    /// already marks completed are skipped before any I/O happens.
    pub async fn run(&self, items: &[WorkItem]) -> PipelineReport {
        let (tx, rx) = mpsc::channel::<QueuedFile>(self.queue_capacity);

        let validator = tokio::spawn(validate_worker(
            rx,
            self.store.clone(),
            self.gdal.clone(),
            self.cancel.clone(),
            self.event_tx.clone(),
            self.poll_interval,
        ));

        let total = items.len();
        let mut report = PipelineReport {
            total,
            ..Default::default()
        };

        for (idx, item) in items.iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            if self.store.is_completed(&item.id) {
                report.already_completed += 1;
                continue;
            }

            let position = idx + 1;
            let destination = self.download_dir.join(&item.filename);

            self.emit(PipelineEvent::FetchStarted {
                id: item.id.clone(),
                filename: item.filename.clone(),
                position,
                total,
                expected_size: item.expected_size,
            });

            // An exact-size local file is treated as "probably already
            // downloaded": skip the network and let validation confirm.
            if let Ok(meta) = tokio::fs::metadata(&destination).await {
                if item.expected_size > 0 && meta.len() == item.expected_size {
                    info!(
                        "[{}/{}] {} exists with correct size, queuing for verification",
                        position, total, item.id
                    );
                    if self
                        .enqueue(&tx, item, &destination, position, total, true)
                        .await
                        .is_err()
                    {
                        report.cancelled = true;
                        break;
                    }
                    report.reused_local += 1;
                    continue;
                }
                warn!(
                    "{} exists but size mismatch ({} vs {}), re-downloading",
                    item.filename,
                    meta.len(),
                    item.expected_size
                );
                let _ = tokio::fs::remove_file(&destination).await;
            }

            info!(
                "[{}/{}] DOWNLOADING: {} - {} ({:.2} MB)",
                position,
                total,
                item.id,
                item.filename,
                item.size_mb()
            );

            let event_tx = self.event_tx.clone();
            let id = item.id.clone();
            let fetch = self
                .fetcher
                .fetch(&item.url, &destination, item.expected_size, |bytes| {
                    let _ = event_tx.send(PipelineEvent::FetchProgress {
                        id: id.clone(),
                        bytes,
                    });
                });
            // Cancellation aborts an in-flight fetch, not just the loop.
            let fetched = tokio::select! {
                result = fetch => result,
                _ = self.cancel.cancelled() => Err(AhngetError::Cancelled),
            };

            match fetched {
                Err(AhngetError::Cancelled) => {
                    let _ = tokio::fs::remove_file(&destination).await;
                    report.cancelled = true;
                    break;
                }
                Ok(_) => {
                    if self
                        .enqueue(&tx, item, &destination, position, total, false)
                        .await
                        .is_err()
                    {
                        report.cancelled = true;
                        break;
                    }
                    report.downloaded += 1;
                }
                Err(e) => {
                    // One failed item never aborts the batch: record it,
                    // clean up the partial file, move on.
                    error!("Failed to download {}: {}", item.id, e);
                    self.store.mark_failed(&item.id, &e.to_string());
                    let _ = tokio::fs::remove_file(&destination).await;
                    self.emit(PipelineEvent::FetchFailed {
                        id: item.id.clone(),
                        error: e.to_string(),
                    });
                    report.fetch_failed += 1;
                }
            }
        }

        // Closing the channel is the end-of-stream signal for the
        // validate stage.
        drop(tx);

        if tokio::time::timeout(self.drain_timeout, validator)
            .await
            .is_err()
        {
            warn!(
                "Validation stage did not finish within {:?}, finalizing anyway",
                self.drain_timeout
            );
        }

        if self.cancel.is_cancelled() {
            report.cancelled = true;
        }
        report
    }

    async fn enqueue(
        &self,
        tx: &mpsc::Sender<QueuedFile>,
        item: &WorkItem,
        destination: &std::path::Path,
        position: usize,
        total: usize,
        reused_local: bool,
    ) -> Result<(), ()> {
        let queued = QueuedFile {
            id: item.id.clone(),
            path: destination.to_path_buf(),
            expected_size: item.expected_size,
            position,
            total,
        };
        // Send fails only when the validate stage is gone (cancelled).
        tx.send(queued).await.map_err(|_| ())?;
        self.emit(PipelineEvent::Queued {
            id: item.id.clone(),
            reused_local,
        });
        Ok(())
    }
}

/// Validate-stage worker: drains the channel until it closes or the
/// cancellation signal is raised, persisting a terminal outcome for
/// every dequeued item.
async fn validate_worker(
    mut rx: mpsc::Receiver<QueuedFile>,
    store: Arc<ProgressStore>,
    gdal: Arc<GdalTools>,
    cancel: CancellationToken,
    event_tx: broadcast::Sender<PipelineEvent>,
    poll_interval: Duration,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let queued = match tokio::time::timeout(poll_interval, rx.recv()).await {
            // Poll timeout: loop around and re-check cancellation.
            Err(_) => continue,
            // Channel closed: the fetch stage has exhausted the index.
            Ok(None) => break,
            Ok(Some(queued)) => queued,
        };

        info!(
            "[{}/{}] VERIFYING: {}",
            queued.position, queued.total, queued.id
        );

        if gdal.validate(&queued.path).await {
            store.mark_completed(&queued.id, queued.expected_size);
            let _ = event_tx.send(PipelineEvent::Validated { id: queued.id });
        } else {
            error!("GDAL verification failed for {}", queued.id);
            store.mark_failed(&queued.id, "GDAL verification failed");
            if let Err(e) = tokio::fs::remove_file(&queued.path).await {
                warn!("Failed to remove {:?}: {}", queued.path, e);
            }
            let _ = event_tx.send(PipelineEvent::ValidationFailed { id: queued.id });
        }
    }
}
