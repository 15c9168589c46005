use anyhow::Result;
use object_mirror::{
    config::{AppConfig, SourceKind},
    errors::MirrorError,
    services::{
        coordinator::{SyncCoordinator, SyncSettings},
        downloader::DownloadOptions,
        index_service::LocalIndex,
    },
    store::{FsObjectStore, ObjectStoreClient, S3ObjectStore},
};
use std::{process::ExitCode, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = match AppConfig::from_env_and_args() {
        Ok(cfg) => cfg,
        Err(err) => {
            tracing::error!("configuration error: {}", err);
            return ExitCode::from(MirrorError::from(err).exit_code());
        }
    };

    match run(cfg).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            tracing::error!("{:#}", err);
            let code = err
                .downcast_ref::<MirrorError>()
                .map(MirrorError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

async fn run(cfg: AppConfig) -> Result<u8> {
    tracing::info!(
        "mirroring bucket `{}` (prefix `{}`) into {}",
        cfg.bucket,
        cfg.prefix,
        cfg.output_dir.display()
    );

    let client = build_client(&cfg).await?;

    // --- One pooled connection per worker ---
    let index = LocalIndex::open(&cfg.index_path, u32::try_from(cfg.workers).unwrap_or(u32::MAX))
        .await
        .map_err(MirrorError::from)?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; finishing in-flight downloads");
                cancel.cancel();
            }
        }
    });

    let settings = SyncSettings {
        bucket: cfg.bucket.clone(),
        prefix: cfg.prefix.clone(),
        page_size: cfg.page_size,
        output_dir: cfg.output_dir.clone(),
        filter: cfg.filter.clone(),
        worker_count: cfg.workers,
        mode: cfg.mode,
        prune_deleted: cfg.prune_deleted,
    };
    let download = DownloadOptions {
        bucket: cfg.bucket.clone(),
        retry_limit: cfg.retry_limit,
        backoff_base: Duration::from_secs(1),
        layout: cfg.layout,
        report_dir: Some(cfg.report_dir.clone()),
        show_progress: cfg.show_progress,
    };
    let coordinator =
        SyncCoordinator::new(client, index.clone(), settings, download).with_cancellation(cancel);

    // --- Inventory mode ---
    if let Some(path) = &cfg.inventory {
        let count = coordinator.export_inventory(path).await?;
        tracing::info!("inventory of {} objects written to {}", count, path.display());
        index.close().await;
        return Ok(0);
    }

    let summary = coordinator.run().await?;
    index.close().await;

    tracing::info!(
        "listed {} objects (complete: {}), pruned {}",
        summary.listed,
        summary.listing_complete,
        summary.pruned
    );
    Ok(summary.exit_code())
}

async fn build_client(cfg: &AppConfig) -> Result<Arc<dyn ObjectStoreClient>, MirrorError> {
    match cfg.source {
        SourceKind::S3 => {
            let settings = cfg
                .s3
                .as_ref()
                .ok_or_else(|| MirrorError::Client("missing S3 settings".into()))?;
            Ok(Arc::new(S3ObjectStore::connect(settings).await?))
        }
        SourceKind::Dir => {
            let root = cfg
                .source_root
                .as_ref()
                .ok_or_else(|| MirrorError::Client("missing source root".into()))?;
            if !root.is_dir() {
                return Err(MirrorError::Client(format!(
                    "source root {} is not a directory",
                    root.display()
                )));
            }
            tracing::info!("serving buckets from {}", root.display());
            Ok(Arc::new(FsObjectStore::new(root.clone())))
        }
    }
}
