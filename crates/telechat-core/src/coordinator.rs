//! Fetch coordinator: mirrors every agenda document into `base/<date>/<id>.pdf`.
//!
//! Date directories are prepared first; any failure there aborts the run.
//! Documents are then pushed onto a work queue drained by a fixed-size pool
//! of workers. Each document runs under its own deadline and observes the
//! coordinator's cancellation token, and reports exactly one
//! [`FetchOutcome`]. Per-document failures never abort the run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Url;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::agenda::{Agenda, DocumentId};
use crate::config::{SyncConfig, DEFAULT_ITEM_TIMEOUT, DEFAULT_WORKERS};
use crate::error::{Result, SyncError};
use crate::outcome::{FailureStage, FetchOutcome, SyncReport};
use crate::telemetry;

/// One `(date, document)` pair waiting for a worker.
#[derive(Debug, Clone)]
struct WorkItem {
    index: usize,
    date: String,
    id: DocumentId,
}

/// Shared state used by every worker.
struct Fetcher {
    client: reqwest::Client,
    doc_base: Url,
    item_timeout: Duration,
    cancel: CancellationToken,
}

impl Fetcher {
    /// Retrieve one document, bounded by the item deadline.
    async fn fetch(&self, base_dir: &Path, date: &str, id: &DocumentId) -> FetchOutcome {
        let file = id.file_name();

        if self.cancel.is_cancelled() {
            return FetchOutcome::Cancelled {
                date: date.to_string(),
                file,
            };
        }

        let path = base_dir.join(date).join(&file);
        let url = match self.doc_base.join(&file) {
            Ok(url) => url,
            Err(e) => {
                return FetchOutcome::failed(
                    date,
                    &file,
                    FailureStage::Request,
                    format!("{}{}", self.doc_base, file),
                    e,
                )
            }
        };

        tokio::select! {
            outcome = self.download(date, &file, &path, url) => outcome,
            _ = tokio::time::sleep(self.item_timeout) => FetchOutcome::TimedOut {
                date: date.to_string(),
                file: id.file_name(),
                after: self.item_timeout,
            },
            _ = self.cancel.cancelled() => FetchOutcome::Cancelled {
                date: date.to_string(),
                file: id.file_name(),
            },
        }
    }

    /// Skip if present, otherwise create the file exclusively and stream the body into it.
    ///
    /// A failed copy leaves the partial file on disk.
    async fn download(&self, date: &str, file: &str, path: &Path, url: Url) -> FetchOutcome {
        let existed = || FetchOutcome::AlreadyExisted {
            date: date.to_string(),
            file: file.to_string(),
        };

        if tokio::fs::metadata(path).await.is_ok() {
            return existed();
        }

        let mut output = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
        {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return existed(),
            Err(e) => return FetchOutcome::create_failed(date, file, path, e),
        };

        let response = match self.client.get(url.clone()).send().await {
            Ok(r) => r,
            Err(e) => {
                return FetchOutcome::failed(date, file, FailureStage::Request, url.as_str(), e)
            }
        };
        let mut response = match response.error_for_status() {
            Ok(r) => r,
            Err(e) => {
                return FetchOutcome::failed(date, file, FailureStage::Request, url.as_str(), e)
            }
        };

        let mut written: u64 = 0;
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    if let Err(e) = output.write_all(&chunk).await {
                        return FetchOutcome::failed(
                            date,
                            file,
                            FailureStage::Write,
                            url.as_str(),
                            e,
                        );
                    }
                    written += chunk.len() as u64;
                }
                Ok(None) => break,
                Err(e) => {
                    return FetchOutcome::failed(date, file, FailureStage::Write, url.as_str(), e)
                }
            }
        }
        if let Err(e) = output.flush().await {
            return FetchOutcome::failed(date, file, FailureStage::Write, url.as_str(), e);
        }

        debug!(path = %path.display(), bytes = written, "document written");
        FetchOutcome::Downloaded {
            date: date.to_string(),
            file: file.to_string(),
            bytes: written,
        }
    }
}

/// Downloads agenda documents into date directories.
pub struct FetchCoordinator {
    client: reqwest::Client,
    doc_base: Url,
    workers: usize,
    item_timeout: Duration,
    cancel: CancellationToken,
}

impl FetchCoordinator {
    /// Create a coordinator fetching documents from `doc_base`.
    pub fn new(client: reqwest::Client, doc_base: Url) -> Self {
        FetchCoordinator {
            client,
            doc_base,
            workers: DEFAULT_WORKERS,
            item_timeout: DEFAULT_ITEM_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }

    /// Build a coordinator (and its HTTP client) from a [`SyncConfig`].
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("telechat-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self::new(client, config.doc_base()?)
            .with_workers(config.workers)
            .with_item_timeout(config.item_timeout))
    }

    /// Set the worker pool size (at least one worker always runs).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = timeout;
        self
    }

    /// Use `token` as the root cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that stops every in-flight and queued download when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn item_timeout(&self) -> Duration {
        self.item_timeout
    }

    fn fetcher(&self) -> Fetcher {
        Fetcher {
            client: self.client.clone(),
            doc_base: self.doc_base.clone(),
            item_timeout: self.item_timeout,
            cancel: self.cancel.clone(),
        }
    }

    /// Ensure `base_dir/<date>` exists for every date in the agenda.
    ///
    /// An existing directory is fine; anything else that prevents the
    /// directory from existing is fatal.
    pub async fn prepare_directories(&self, base_dir: &Path, agenda: &Agenda) -> Result<()> {
        for date in agenda.dates() {
            let dir = base_dir.join(date);
            match tokio::fs::create_dir(&dir).await {
                Ok(()) => debug!(dir = %dir.display(), "created date directory"),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let is_dir = tokio::fs::metadata(&dir)
                        .await
                        .map(|m| m.is_dir())
                        .unwrap_or(false);
                    if !is_dir {
                        return Err(SyncError::CreateDir { path: dir, source: e });
                    }
                }
                Err(e) => return Err(SyncError::CreateDir { path: dir, source: e }),
            }
        }
        Ok(())
    }

    /// Fetch a single document into `base_dir/<date>/<id>.pdf`.
    ///
    /// The date directory must already exist.
    pub async fn fetch_document(
        &self,
        base_dir: &Path,
        date: &str,
        id: &DocumentId,
    ) -> FetchOutcome {
        self.fetcher().fetch(base_dir, date, id).await
    }

    /// Sync every document in `agenda` under `base_dir`.
    ///
    /// Returns one outcome per `(date, document)` pair, in arrival order.
    ///
    /// # Errors
    /// [`SyncError::CreateDir`] if a date directory cannot be created; no
    /// download is attempted in that case.
    #[instrument(skip(self, agenda), fields(base_dir = %base_dir.display()))]
    pub async fn sync_all(&self, base_dir: &Path, agenda: &Agenda) -> Result<SyncReport> {
        let started = Instant::now();
        self.prepare_directories(base_dir, agenda).await?;

        let items: Vec<WorkItem> = agenda
            .iter()
            .enumerate()
            .map(|(index, (date, id))| WorkItem {
                index,
                date: date.to_string(),
                id: id.clone(),
            })
            .collect();

        if items.is_empty() {
            let report = SyncReport::default();
            telemetry::emit_sync_finished(&report, 0);
            return Ok(report);
        }

        let worker_count = self.workers.min(items.len());
        telemetry::emit_sync_started(worker_count, items.len(), agenda.date_count());

        let (queue_tx, queue_rx) = mpsc::channel(items.len());
        for item in &items {
            // Capacity equals the item count and the receiver is alive.
            let _ = queue_tx.try_send(item.clone());
        }
        drop(queue_tx);
        let queue_rx = Arc::new(Mutex::new(queue_rx));

        let (outcome_tx, mut outcome_rx) = mpsc::channel::<(usize, FetchOutcome)>(items.len());
        let base_dir: Arc<PathBuf> = Arc::new(base_dir.to_path_buf());
        let fetcher = Arc::new(self.fetcher());

        let mut workers = JoinSet::new();
        for worker in 0..worker_count {
            let queue_rx = Arc::clone(&queue_rx);
            let outcome_tx = outcome_tx.clone();
            let fetcher = Arc::clone(&fetcher);
            let base_dir = Arc::clone(&base_dir);

            workers.spawn(async move {
                loop {
                    let next = queue_rx.lock().await.recv().await;
                    let Some(item) = next else {
                        break;
                    };
                    let outcome = fetcher.fetch(&base_dir, &item.date, &item.id).await;
                    if outcome_tx.send((item.index, outcome)).await.is_err() {
                        break;
                    }
                }
                debug!(worker, "worker finished");
            });
        }
        drop(outcome_tx);

        let mut reported = vec![false; items.len()];
        let mut outcomes = Vec::with_capacity(items.len());
        while let Some((index, outcome)) = outcome_rx.recv().await {
            telemetry::emit_item_finished(&outcome);
            reported[index] = true;
            outcomes.push(outcome);
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "download worker exited abnormally");
            }
        }

        for item in items.iter().filter(|item| !reported[item.index]) {
            let outcome = FetchOutcome::failed(
                &item.date,
                &item.id.file_name(),
                FailureStage::Worker,
                format!("{}/{}", item.date, item.id.file_name()),
                "worker exited without reporting",
            );
            telemetry::emit_item_finished(&outcome);
            outcomes.push(outcome);
        }

        let report = SyncReport::new(outcomes);
        telemetry::emit_sync_finished(&report, started.elapsed().as_millis() as u64);
        Ok(report)
    }
}
