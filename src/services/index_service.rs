//! src/services/index_service.rs
//!
//! LocalIndex — durable record of every file the mirror has materialized,
//! keyed by local path and looked up by (remote key, etag) before any network
//! call. Backed by SQLite through a connection pool sized to the worker
//! count, so every concurrent worker runs on its own connection and relies on
//! SQLite transactions for isolation.

use crate::{
    errors::{IndexError, IndexResult},
    models::IndexRecord,
};
use chrono::Utc;
use md5::Context;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use std::{path::Path, time::Duration};
use tokio::{fs::File, io::AsyncReadExt};
use tracing::debug;

const INIT_SQL: &str = include_str!("../../migrations/0001_init.sql");
const HASH_CHUNK_SIZE: usize = 4096;
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct LocalIndex {
    /// Shared pool; each checkout is an independent SQLite connection.
    pub db: SqlitePool,
}

impl LocalIndex {
    /// Open (or create) the index database at `path`.
    ///
    /// `max_connections` should be at least the number of download workers.
    pub async fn open(path: impl AsRef<Path>, max_connections: u32) -> IndexResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let db = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        debug!("opened local index at {}", path.display());
        Self::from_pool(db).await
    }

    /// Wrap an existing pool, creating the table if it is missing.
    pub async fn from_pool(db: SqlitePool) -> IndexResult<Self> {
        let index = Self { db };
        index.run_migrations().await?;
        Ok(index)
    }

    /// Apply the embedded schema. Every statement is IF NOT EXISTS, so
    /// processes racing on first creation are harmless.
    async fn run_migrations(&self) -> IndexResult<()> {
        let statements = INIT_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty());
        for stmt in statements {
            sqlx::query(stmt).execute(&self.db).await?;
        }
        Ok(())
    }

    /// Insert or replace the record for `record.local_path`.
    ///
    /// `download_time` is always set to the current time. Returns the record
    /// as stored.
    pub async fn add_file(&self, record: &IndexRecord) -> IndexResult<IndexRecord> {
        let file_size = i64::try_from(record.file_size)
            .map_err(|_| IndexError::SizeOutOfRange(record.file_size))?;
        let download_time = Utc::now().to_rfc3339();

        let mut tx = self.db.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO local_files (
                file_path, file_size, last_modified, md5_hash,
                download_time, remote_key, etag
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(file_path) DO UPDATE SET
                file_size = excluded.file_size,
                last_modified = excluded.last_modified,
                md5_hash = excluded.md5_hash,
                download_time = excluded.download_time,
                remote_key = excluded.remote_key,
                etag = excluded.etag
            "#,
        )
        .bind(&record.local_path)
        .bind(file_size)
        .bind(&record.last_modified)
        .bind(&record.content_hash)
        .bind(&download_time)
        .bind(&record.remote_key)
        .bind(&record.entity_tag)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(IndexRecord {
            download_time,
            ..record.clone()
        })
    }

    pub async fn get_file(&self, local_path: &str) -> IndexResult<Option<IndexRecord>> {
        let record = sqlx::query_as::<_, IndexRecord>(
            "SELECT file_path, file_size, last_modified, md5_hash,
                    download_time, remote_key, etag
             FROM local_files WHERE file_path = ?",
        )
        .bind(local_path)
        .fetch_optional(&self.db)
        .await?;
        Ok(record)
    }

    pub async fn get_all_files(&self) -> IndexResult<Vec<IndexRecord>> {
        let records = sqlx::query_as::<_, IndexRecord>(
            "SELECT file_path, file_size, last_modified, md5_hash,
                    download_time, remote_key, etag
             FROM local_files",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(records)
    }

    /// Delete the record for `local_path`. Missing rows are not an error.
    pub async fn remove_file(&self, local_path: &str) -> IndexResult<()> {
        let mut tx = self.db.begin().await?;
        let result = sqlx::query("DELETE FROM local_files WHERE file_path = ?")
            .bind(local_path)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        if result.rows_affected() == 0 {
            debug!("no index record for {}", local_path);
        }
        Ok(())
    }

    /// Dedupe gate: true iff some record holds exactly this key/etag pair.
    pub async fn file_exists(&self, remote_key: &str, entity_tag: &str) -> IndexResult<bool> {
        let hit = sqlx::query_scalar::<_, i64>(
            "SELECT 1 FROM local_files WHERE remote_key = ? AND etag = ? LIMIT 1",
        )
        .bind(remote_key)
        .bind(entity_tag)
        .fetch_optional(&self.db)
        .await?;
        Ok(hit.is_some())
    }

    /// MD5 hex digest of the file, read in fixed-size chunks.
    pub async fn calculate_content_hash(path: impl AsRef<Path>) -> IndexResult<String> {
        let mut file = File::open(path.as_ref()).await.map_err(IndexError::Io)?;
        let mut digest = Context::new();
        let mut buf = vec![0u8; HASH_CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            digest.consume(&buf[..n]);
        }
        Ok(format!("{:x}", digest.compute()))
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_temp(max: u32) -> (TempDir, LocalIndex) {
        let dir = tempfile::tempdir().unwrap();
        let index = LocalIndex::open(dir.path().join("index.db"), max)
            .await
            .unwrap();
        (dir, index)
    }

    fn record(path: &str, key: &str, etag: &str) -> IndexRecord {
        IndexRecord {
            local_path: path.into(),
            file_size: 10,
            last_modified: "2024-01-01T00:00:00+00:00".into(),
            content_hash: "d41d8cd98f00b204e9800998ecf8427e".into(),
            download_time: String::new(),
            remote_key: key.into(),
            entity_tag: etag.into(),
        }
    }

    #[tokio::test]
    async fn add_then_get_sets_download_time() {
        let (_dir, index) = open_temp(2).await;
        let stored = index
            .add_file(&record("out/a.txt", "a.txt", "x"))
            .await
            .unwrap();
        assert!(!stored.download_time.is_empty());

        let fetched = index.get_file("out/a.txt").await.unwrap().unwrap();
        assert_eq!(fetched, stored);
        assert!(index.get_file("out/missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn add_is_an_upsert_by_local_path() {
        let (_dir, index) = open_temp(2).await;
        index
            .add_file(&record("out/a.txt", "a.txt", "old"))
            .await
            .unwrap();
        index
            .add_file(&record("out/a.txt", "a.txt", "new"))
            .await
            .unwrap();

        let all = index.get_all_files().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].entity_tag, "new");
        assert!(index.file_exists("a.txt", "new").await.unwrap());
        assert!(!index.file_exists("a.txt", "old").await.unwrap());
    }

    #[tokio::test]
    async fn remove_is_noop_for_missing_rows() {
        let (_dir, index) = open_temp(1).await;
        index.remove_file("never/added").await.unwrap();

        index
            .add_file(&record("out/b.txt", "b.txt", "y"))
            .await
            .unwrap();
        index.remove_file("out/b.txt").await.unwrap();
        assert!(index.get_all_files().await.unwrap().is_empty());
        assert!(!index.file_exists("b.txt", "y").await.unwrap());
    }

    #[tokio::test]
    async fn file_exists_requires_exact_pair() {
        let (_dir, index) = open_temp(1).await;
        index
            .add_file(&record("out/a.txt", "a.txt", "x"))
            .await
            .unwrap();
        assert!(index.file_exists("a.txt", "x").await.unwrap());
        assert!(!index.file_exists("a.txt", "y").await.unwrap());
        assert!(!index.file_exists("b.txt", "x").await.unwrap());
    }

    #[tokio::test]
    async fn oversized_file_size_is_rejected() {
        let (_dir, index) = open_temp(1).await;
        let huge = IndexRecord {
            file_size: u64::MAX,
            ..record("out/huge.bin", "huge.bin", "h")
        };
        let err = index.add_file(&huge).await.unwrap_err();
        assert!(matches!(err, IndexError::SizeOutOfRange(u64::MAX)));
        assert!(index.get_all_files().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_writers_each_land_one_row() {
        let (_dir, index) = open_temp(8).await;
        let mut handles = Vec::new();
        for i in 0..32 {
            let index = index.clone();
            handles.push(tokio::spawn(async move {
                let path = format!("out/{i}.bin");
                let key = format!("{i}.bin");
                index.add_file(&record(&path, &key, "e")).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(index.get_all_files().await.unwrap().len(), 32);
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/index.db");
        {
            let index = LocalIndex::open(&path, 1).await.unwrap();
            index
                .add_file(&record("out/a.txt", "a.txt", "x"))
                .await
                .unwrap();
            index.close().await;
        }
        let index = LocalIndex::open(&path, 1).await.unwrap();
        assert!(index.file_exists("a.txt", "x").await.unwrap());
    }

    #[tokio::test]
    async fn content_hash_is_md5_hex() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"hello world").unwrap();
        let hash = LocalIndex::calculate_content_hash(&path).await.unwrap();
        assert_eq!(hash, "5eb63bbbe01eeed093cb22bb8f5acdc3");

        let big = dir.path().join("big.bin");
        std::fs::write(&big, vec![7u8; HASH_CHUNK_SIZE * 3 + 17]).unwrap();
        let expected = format!("{:x}", md5::compute(vec![7u8; HASH_CHUNK_SIZE * 3 + 17]));
        assert_eq!(
            LocalIndex::calculate_content_hash(&big).await.unwrap(),
            expected
        );
    }
}
