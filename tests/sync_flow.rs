use object_mirror::{
    services::{
        coordinator::{SyncCoordinator, SyncMode, SyncSettings},
        downloader::{DownloadOptions, PathLayout},
        index_service::LocalIndex,
        lister::ObjectFilter,
    },
    store::FsObjectStore,
};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tempfile::TempDir;

const BUCKET: &str = "media";

struct Fixture {
    _dir: TempDir,
    remote: PathBuf,
    out: PathBuf,
    logs: PathBuf,
    index: LocalIndex,
}

impl Fixture {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let remote = dir.path().join("remote");
        let out = dir.path().join("out");
        let logs = dir.path().join("logs");
        fs::create_dir_all(remote.join(BUCKET)).unwrap();
        let index = LocalIndex::open(dir.path().join("index.db"), 4)
            .await
            .unwrap();
        Self {
            _dir: dir,
            remote,
            out,
            logs,
            index,
        }
    }

    fn put(&self, key: &str, body: &[u8]) {
        let path = self.remote.join(BUCKET).join(key);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn coordinator(&self, mode: SyncMode, layout: PathLayout) -> SyncCoordinator {
        let settings = SyncSettings {
            bucket: BUCKET.into(),
            prefix: String::new(),
            page_size: 2,
            output_dir: self.out.clone(),
            filter: ObjectFilter::default(),
            worker_count: 3,
            mode,
            prune_deleted: true,
        };
        let download = DownloadOptions {
            bucket: BUCKET.into(),
            retry_limit: 2,
            backoff_base: Duration::from_millis(1),
            layout,
            report_dir: Some(self.logs.clone()),
            show_progress: false,
        };
        SyncCoordinator::new(
            Arc::new(FsObjectStore::new(&self.remote)),
            self.index.clone(),
            settings,
            download,
        )
    }
}

fn read(path: &Path) -> Vec<u8> {
    fs::read(path).unwrap()
}

#[tokio::test]
async fn repeated_sync_is_a_no_op() {
    let fx = Fixture::new().await;
    fx.put("a.txt", b"alpha");
    fx.put("songs/b.mp3", b"bravo-bravo");
    fx.put("songs/live/c.mp3", b"charlie");

    let first = fx.coordinator(SyncMode::Diff, PathLayout::Tree).run().await.unwrap();
    assert!(first.listing_complete);
    assert_eq!(first.listed, 3);
    assert_eq!(first.new, 3);
    assert_eq!(first.report.as_ref().unwrap().statistics.success, 3);
    assert_eq!(first.exit_code(), 0);
    assert_eq!(read(&fx.out.join("songs/live/c.mp3")), b"charlie");
    assert_eq!(fx.index.get_all_files().await.unwrap().len(), 3);

    let second = fx.coordinator(SyncMode::Diff, PathLayout::Tree).run().await.unwrap();
    assert_eq!((second.new, second.updated, second.deleted), (0, 0, 0));
    assert!(second.report.is_none());
    assert_eq!(second.exit_code(), 0);
}

#[tokio::test]
async fn changed_remote_content_is_updated_and_removed_object_pruned() {
    let fx = Fixture::new().await;
    fx.put("a.txt", b"alpha");
    fx.put("b.txt", b"bravo");
    fx.coordinator(SyncMode::Diff, PathLayout::Tree).run().await.unwrap();

    // Same length, different bytes: only the etag can tell.
    fx.put("a.txt", b"ALPHA");
    fs::remove_file(fx.remote.join(BUCKET).join("b.txt")).unwrap();

    let summary = fx.coordinator(SyncMode::Diff, PathLayout::Tree).run().await.unwrap();
    assert_eq!((summary.new, summary.updated, summary.deleted), (0, 1, 1));
    assert_eq!(summary.pruned, 1);
    assert_eq!(summary.report.as_ref().unwrap().statistics.success, 1);
    assert_eq!(read(&fx.out.join("a.txt")), b"ALPHA");
    assert!(!fx.out.join("b.txt").exists());

    let records = fx.index.get_all_files().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].content_hash, format!("{:x}", md5::compute(b"ALPHA")));
}

#[tokio::test]
async fn mirror_mode_skips_everything_already_indexed() {
    let fx = Fixture::new().await;
    fx.put("x/1.bin", b"one");
    fx.put("x/2.bin", b"two");
    fx.coordinator(SyncMode::Mirror, PathLayout::Flat).run().await.unwrap();
    assert_eq!(read(&fx.out.join("x%2F1.bin")), b"one");

    let again = fx.coordinator(SyncMode::Mirror, PathLayout::Flat).run().await.unwrap();
    let stats = again.report.unwrap().statistics;
    assert_eq!(stats.skipped, 2);
    assert_eq!(stats.success, 0);
    assert_eq!(stats.total, 2);

    let reports = fs::read_dir(&fx.logs).unwrap().count();
    assert_eq!(reports, 2);
}
