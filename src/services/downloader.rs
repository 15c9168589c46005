//! src/services/downloader.rs
//!
//! DownloadOrchestrator — runs per-object download tasks on a bounded pool of
//! workers and folds their outcomes into a [`DownloadReport`].
//!
//! Each task walks an explicit state machine:
//! `Pending -> Attempting(1) -> ... -> Attempting(n) -> Succeeded | Failed`,
//! sleeping `backoff_base * 2^(n-1)` between attempts. A task only reports
//! success once the index upsert for its file has committed.

use crate::{
    errors::{IndexError, TransferError},
    models::{
        DownloadOutcome, DownloadReport, DownloadStats, IndexRecord, RemoteObject, ReportConfig,
        SkipReason,
    },
    services::index_service::LocalIndex,
    store::ObjectStoreClient,
};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::{StreamExt, future, stream};
use indicatif::{ProgressBar, ProgressStyle};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Characters escaped when flattening a key into a single file name.
const FLAT_ESCAPES: &AsciiSet = &CONTROLS.add(b'/').add(b'\\').add(b'%');

/// How remote keys map onto paths under the output directory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathLayout {
    /// Mirror the key hierarchy as directories.
    #[default]
    Tree,
    /// One file per key directly in the output directory, percent-encoded.
    Flat,
}

impl PathLayout {
    /// Deterministic, collision-free destination for `key`.
    pub fn local_path(&self, output_dir: &Path, key: &str) -> Result<PathBuf, TransferError> {
        let invalid = || TransferError::InvalidKey(key.to_string());
        if key.is_empty() {
            return Err(invalid());
        }
        match self {
            PathLayout::Tree => {
                if key.bytes().any(|b| b.is_ascii_control() || b == b'\\') {
                    return Err(invalid());
                }
                let mut path = output_dir.to_path_buf();
                for segment in key.split('/') {
                    if segment.is_empty() || segment == "." || segment == ".." {
                        return Err(invalid());
                    }
                    path.push(segment);
                }
                Ok(path)
            }
            PathLayout::Flat => {
                let name = utf8_percent_encode(key, FLAT_ESCAPES).to_string();
                let name = match name.as_str() {
                    "." => "%2E".to_string(),
                    ".." => "%2E%2E".to_string(),
                    _ => name,
                };
                Ok(output_dir.join(name))
            }
        }
    }
}

/// Settings fixed for the lifetime of an orchestrator.
#[derive(Clone, Debug)]
pub struct DownloadOptions {
    pub bucket: String,
    pub retry_limit: u32,
    /// Delay before the second attempt; doubles for each further attempt.
    pub backoff_base: Duration,
    pub layout: PathLayout,
    /// Where report artifacts are written. `None` disables writing.
    pub report_dir: Option<PathBuf>,
    pub show_progress: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            retry_limit: 3,
            backoff_base: Duration::from_secs(1),
            layout: PathLayout::Tree,
            report_dir: None,
            show_progress: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TaskState {
    Pending,
    Attempting(u32),
    Succeeded,
    Failed(String),
}

/// Everything a single worker needs. Shared read-only across workers; the
/// index hands each concurrent caller its own pooled connection.
struct Worker {
    client: Arc<dyn ObjectStoreClient>,
    index: LocalIndex,
    bucket: String,
    retry_limit: u32,
    backoff_base: Duration,
    layout: PathLayout,
}

/// Delay after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}

impl Worker {
    async fn run(&self, object: &RemoteObject, output_dir: &Path) -> DownloadOutcome {
        if object.is_directory_marker() {
            return self.materialize_directory(object, output_dir).await;
        }

        let local_path = match self.layout.local_path(output_dir, &object.key) {
            Ok(path) => path,
            Err(err) => {
                error!("{err}");
                return DownloadOutcome::Failed(err.to_string());
            }
        };

        let mut state = TaskState::Pending;
        loop {
            state = match state {
                TaskState::Pending => match self.precheck(object, &local_path).await {
                    Ok(Some(reason)) => return DownloadOutcome::Skipped(reason),
                    Ok(None) => TaskState::Attempting(1),
                    Err(err) => TaskState::Failed(err),
                },
                TaskState::Attempting(n) => match self.transfer(object, &local_path).await {
                    Ok(()) => TaskState::Succeeded,
                    Err(err) if n < self.retry_limit => {
                        let delay = backoff_delay(self.backoff_base, n);
                        warn!(
                            "download failed (attempt {}/{}): {}: {}; retrying in {:?}",
                            n, self.retry_limit, object.key, err, delay
                        );
                        tokio::time::sleep(delay).await;
                        TaskState::Attempting(n + 1)
                    }
                    Err(err) => TaskState::Failed(format!(
                        "transfer failed after {n} attempts: {err}"
                    )),
                },
                TaskState::Succeeded => {
                    return match self.commit(object, &local_path).await {
                        Ok(()) => {
                            info!("downloaded {}", object.key);
                            DownloadOutcome::Success
                        }
                        Err(err) => {
                            error!(
                                "{} transferred but not indexed, will retry next sync: {}",
                                object.key, err
                            );
                            DownloadOutcome::Failed(format!("index write failed: {err}"))
                        }
                    };
                }
                TaskState::Failed(reason) => {
                    error!("download finally failed: {}: {}", object.key, reason);
                    return DownloadOutcome::Failed(reason);
                }
            };
        }
    }

    /// Tree layout gets the directory; other layouts have nowhere to put it.
    async fn materialize_directory(
        &self,
        object: &RemoteObject,
        output_dir: &Path,
    ) -> DownloadOutcome {
        let dir_key = object.key.trim_end_matches('/');
        if self.layout == PathLayout::Tree
            && let Ok(dir) = self.layout.local_path(output_dir, dir_key)
            && let Err(err) = fs::create_dir_all(&dir).await
        {
            error!("create {}: {}", dir.display(), err);
            return DownloadOutcome::Failed(format!("create {}: {err}", dir.display()));
        }
        debug!("directory marker, nothing to fetch: {}", object.key);
        DownloadOutcome::Skipped(SkipReason::DirectoryMarker)
    }

    /// Dedupe gate, then the on-disk size check, then parent directories.
    async fn precheck(
        &self,
        object: &RemoteObject,
        local_path: &Path,
    ) -> Result<Option<SkipReason>, String> {
        match self.index.file_exists(&object.key, &object.entity_tag).await {
            Ok(true) => {
                info!("already indexed, skipping: {}", object.key);
                return Ok(Some(SkipReason::Indexed));
            }
            Ok(false) => {}
            Err(err) => return Err(format!("index lookup failed: {err}")),
        }

        // A file the index knows about under another etag is stale, whatever its size.
        match fs::metadata(local_path).await {
            Ok(meta) if meta.is_file() && meta.len() == object.size => {
                let path = local_path.to_string_lossy();
                match self.index.get_file(&path).await {
                    Ok(None) => {
                        info!("already on disk, skipping: {}", object.key);
                        return Ok(Some(SkipReason::PresentOnDisk));
                    }
                    Ok(Some(_)) => debug!("indexed copy of {} is stale", object.key),
                    Err(err) => return Err(format!("index lookup failed: {err}")),
                }
            }
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(format!("stat {}: {err}", local_path.display())),
        }

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| format!("create {}: {err}", parent.display()))?;
        }
        Ok(None)
    }

    async fn transfer(&self, object: &RemoteObject, local_path: &Path) -> Result<(), TransferError> {
        self.client
            .download_file(&self.bucket, &object.key, local_path)
            .await?;

        let actual = fs::metadata(local_path).await?.len();
        if actual != object.size {
            let _ = fs::remove_file(local_path).await;
            return Err(TransferError::SizeMismatch {
                expected: object.size,
                actual,
            });
        }
        Ok(())
    }

    async fn commit(&self, object: &RemoteObject, local_path: &Path) -> Result<(), IndexError> {
        let content_hash = LocalIndex::calculate_content_hash(local_path).await?;
        let meta = fs::metadata(local_path).await?;
        let modified: DateTime<Utc> = meta.modified()?.into();

        self.index
            .add_file(&IndexRecord {
                local_path: local_path.to_string_lossy().into_owned(),
                file_size: meta.len(),
                last_modified: modified.to_rfc3339(),
                content_hash,
                download_time: String::new(),
                remote_key: object.key.clone(),
                entity_tag: object.entity_tag.clone(),
            })
            .await?;
        Ok(())
    }
}

pub struct DownloadOrchestrator {
    worker: Arc<Worker>,
    options: DownloadOptions,
    cancel: CancellationToken,
}

impl DownloadOrchestrator {
    pub fn new(
        client: Arc<dyn ObjectStoreClient>,
        index: LocalIndex,
        options: DownloadOptions,
    ) -> Self {
        let worker = Worker {
            client,
            index,
            bucket: options.bucket.clone(),
            retry_limit: options.retry_limit.max(1),
            backoff_base: options.backoff_base,
            layout: options.layout,
        };
        Self {
            worker: Arc::new(worker),
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop handing out new tasks once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run a single task inline.
    pub async fn download_one(&self, object: &RemoteObject, output_dir: &Path) -> DownloadOutcome {
        self.worker.run(object, output_dir).await
    }

    /// Download `objects` into `output_dir` with at most `worker_count`
    /// tasks in flight.
    ///
    /// Every submitted object is counted exactly once in the returned report,
    /// whatever happens to it. Objects not yet submitted when cancellation is
    /// observed are counted in `not_submitted`.
    pub async fn download_many(
        &self,
        objects: Vec<RemoteObject>,
        output_dir: &Path,
        worker_count: usize,
    ) -> DownloadReport {
        let requested = objects.len();
        let worker_count = worker_count.max(1);

        if let Err(err) = fs::create_dir_all(output_dir).await {
            error!("cannot create output dir {}: {}", output_dir.display(), err);
        }
        info!(
            "starting download of {} objects to {} with {} workers",
            requested,
            output_dir.display(),
            worker_count
        );

        let progress = self.progress_bar(requested as u64);
        let cancel = self.cancel.clone();
        let output_dir_buf = output_dir.to_path_buf();

        let results = stream::iter(objects)
            .take_while(|_| future::ready(!cancel.is_cancelled()))
            .map(|object| {
                let worker = Arc::clone(&self.worker);
                let dir = output_dir_buf.clone();
                async move {
                    let key = object.key.clone();
                    let handle = tokio::spawn(async move { worker.run(&object, &dir).await });
                    match handle.await {
                        Ok(outcome) => (key, outcome),
                        Err(join_err) => {
                            error!("task execution error for {}: {}", key, join_err);
                            (key, DownloadOutcome::Failed(format!("worker crashed: {join_err}")))
                        }
                    }
                }
            })
            .buffer_unordered(worker_count);
        futures::pin_mut!(results);

        let mut stats = DownloadStats::default();
        while let Some((_key, outcome)) = results.next().await {
            stats.record(&outcome);
            progress.inc(1);
            progress.set_message(format!(
                "success {} failed {} skipped {}",
                stats.success, stats.failed, stats.skipped
            ));
        }
        progress.finish_and_clear();

        let not_submitted = requested - stats.total;
        let interrupted = self.cancel.is_cancelled();
        if interrupted {
            warn!(
                "interrupted: {} objects settled, {} never started",
                stats.total, not_submitted
            );
        }

        let report = DownloadReport {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            output_dir: output_dir.display().to_string(),
            statistics: stats,
            config: ReportConfig {
                worker_count,
                retry_limit: self.worker.retry_limit,
            },
            interrupted,
            not_submitted,
        };

        if let Some(dir) = &self.options.report_dir {
            match write_report(dir, &report).await {
                Ok(path) => info!("download report saved to: {}", path.display()),
                Err(err) => error!("failed to write download report: {}", err),
            }
        }
        report
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.options.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len);
        let style = ProgressStyle::with_template(
            "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}",
        )
        .map(|s| s.progress_chars("=>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar
    }
}

/// Persist `report` as pretty JSON under `dir` with a timestamped name.
pub async fn write_report(dir: &Path, report: &DownloadReport) -> io::Result<PathBuf> {
    fs::create_dir_all(dir).await?;
    let stamp = Utc::now().format("%Y%m%d_%H%M%S_%3f");
    let mut path = dir.join(format!("download_report_{stamp}.json"));
    if fs::try_exists(&path).await? {
        path = dir.join(format!("download_report_{stamp}_{}.json", Uuid::new_v4().simple()));
    }
    let body = serde_json::to_vec_pretty(report).map_err(io::Error::other)?;
    fs::write(&path, body).await?;
    Ok(path)
}
