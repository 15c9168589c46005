//! Sync coordinator: list fully, then diff, then download.

use crate::{
    errors::{IndexError, MirrorError},
    models::{DownloadReport, IndexRecord, ObjectInfo, RemoteObject},
    services::{
        differ::{self, SyncDiff},
        downloader::{DownloadOptions, DownloadOrchestrator},
        index_service::LocalIndex,
        lister::{Listing, ObjectFilter, RemoteLister},
    },
    store::ObjectStoreClient,
};
use serde::{Deserialize, Serialize};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Download everything that passes the filter; the dedupe gate skips
    /// what is already indexed.
    #[default]
    Mirror,
    /// Diff against the index first and download only new or updated objects.
    Diff,
}

#[derive(Clone, Debug)]
pub struct SyncSettings {
    pub bucket: String,
    pub prefix: String,
    pub page_size: usize,
    pub output_dir: PathBuf,
    pub filter: ObjectFilter,
    pub worker_count: usize,
    pub mode: SyncMode,
    /// Remove local files whose remote object disappeared. Diff mode only,
    /// and only after a complete listing.
    pub prune_deleted: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub listed: usize,
    pub listing_complete: bool,
    pub new: usize,
    pub updated: usize,
    pub deleted: usize,
    pub pruned: usize,
    pub report: Option<DownloadReport>,
    pub interrupted: bool,
}

impl SyncSummary {
    /// 130 when interrupted, 1 when any download failed, otherwise 0.
    pub fn exit_code(&self) -> u8 {
        if self.interrupted || self.report.as_ref().is_some_and(|r| r.interrupted) {
            130
        } else if self.report.as_ref().is_some_and(DownloadReport::has_failures) {
            1
        } else {
            0
        }
    }
}

pub struct SyncCoordinator {
    lister: RemoteLister,
    index: LocalIndex,
    orchestrator: DownloadOrchestrator,
    settings: SyncSettings,
    cancel: CancellationToken,
}

impl SyncCoordinator {
    pub fn new(
        client: Arc<dyn ObjectStoreClient>,
        index: LocalIndex,
        settings: SyncSettings,
        download: DownloadOptions,
    ) -> Self {
        let orchestrator = DownloadOrchestrator::new(Arc::clone(&client), index.clone(), download);
        Self {
            lister: RemoteLister::new(client),
            index,
            orchestrator,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.orchestrator = self.orchestrator.with_cancellation(token.clone());
        self.cancel = token;
        self
    }

    pub async fn list_remote(&self) -> Listing {
        let s = &self.settings;
        self.lister.list(&s.bucket, &s.prefix, s.page_size).await
    }

    pub async fn run(&self) -> Result<SyncSummary, MirrorError> {
        let listing = self.list_remote().await;
        let mut summary = SyncSummary {
            listed: listing.objects.len(),
            listing_complete: listing.complete,
            ..SyncSummary::default()
        };
        if !listing.complete {
            warn!(
                "listing incomplete after {} objects; continuing with partial results",
                listing.objects.len()
            );
        }
        if self.cancel.is_cancelled() {
            summary.interrupted = true;
            return Ok(summary);
        }

        let to_download = match self.settings.mode {
            SyncMode::Mirror => self.settings.filter.apply(listing.objects),
            SyncMode::Diff => {
                let diff = self.diff(&listing.objects).await?;
                summary.new = diff.new.len();
                summary.updated = diff.updated.len();
                summary.deleted = diff.deleted.len();
                info!(
                    "sync diff: {} new, {} updated, {} deleted",
                    summary.new, summary.updated, summary.deleted
                );

                if self.settings.prune_deleted && !diff.deleted.is_empty() {
                    if listing.complete {
                        summary.pruned = self.prune(&diff.deleted).await;
                    } else {
                        warn!("listing incomplete; not pruning {} records", diff.deleted.len());
                    }
                }
                self.settings.filter.apply(diff.to_download())
            }
        };

        if to_download.is_empty() {
            info!("nothing to download");
            return Ok(summary);
        }

        let report = self
            .orchestrator
            .download_many(to_download, &self.settings.output_dir, self.settings.worker_count)
            .await;
        let stats = &report.statistics;
        info!(
            "download complete: success {}, failed {}, skipped {}, total {}",
            stats.success, stats.failed, stats.skipped, stats.total
        );
        summary.interrupted = report.interrupted;
        summary.report = Some(report);
        Ok(summary)
    }

    /// Diff against the index records under the configured prefix; records
    /// outside it belong to other syncs and are never reported deleted.
    async fn diff(&self, remote: &[RemoteObject]) -> Result<SyncDiff, IndexError> {
        let prefix = self.settings.prefix.as_str();
        let local: Vec<IndexRecord> = self
            .index
            .get_all_files()
            .await?
            .into_iter()
            .filter(|record| record.remote_key.starts_with(prefix))
            .collect();
        Ok(differ::compare(remote, &local))
    }

    /// Remove the local file and index record of every deleted entry.
    async fn prune(&self, deleted: &[IndexRecord]) -> usize {
        let mut pruned = 0;
        for record in deleted {
            match fs::remove_file(&record.local_path).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    error!("failed to remove {}: {}", record.local_path, err);
                    continue;
                }
            }
            match self.index.remove_file(&record.local_path).await {
                Ok(()) => {
                    info!("pruned {}", record.remote_key);
                    pruned += 1;
                }
                Err(err) => error!("failed to unindex {}: {}", record.local_path, err),
            }
        }
        pruned
    }

    /// List the bucket and write its inventory to `path`.
    pub async fn export_inventory(&self, path: &Path) -> Result<usize, MirrorError> {
        let listing = self.list_remote().await;
        if !listing.complete {
            warn!("inventory may be incomplete");
        }
        let objects = self.settings.filter.apply(listing.objects);
        export_inventory(&objects, path).await?;
        info!("saved {} objects to {}", objects.len(), path.display());
        Ok(objects.len())
    }
}

/// Write `objects` as a pretty JSON array of [`ObjectInfo`].
pub async fn export_inventory(objects: &[RemoteObject], path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).await?;
    }
    let infos: Vec<ObjectInfo> = objects.iter().map(ObjectInfo::from).collect();
    let body = serde_json::to_vec_pretty(&infos).map_err(io::Error::other)?;
    fs::write(path, body).await
}
