//! Object-store client capability.
//!
//! The mirror only needs three operations from a store: paginated listing,
//! a streaming read, and a download-to-path. [`ObjectStoreClient`] captures
//! them; `s3` talks to S3-compatible services and `fs` serves buckets laid
//! out as directories.

pub mod fs;
pub mod s3;

use crate::errors::StoreError;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, pin_mut, stream::BoxStream};
use std::{
    io::{self, ErrorKind},
    path::Path,
};
use tokio::{fs as tfs, io::AsyncWriteExt};
use uuid::Uuid;

pub use fs::FsObjectStore;
pub use s3::S3ObjectStore;

/// Streaming object body.
pub type ObjectStream = BoxStream<'static, io::Result<Bytes>>;

/// Raw listing entry as the store reports it. The etag may still be quoted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreObject {
    pub key: String,
    pub size: u64,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    pub storage_class: Option<String>,
}

/// One page of a marker-based listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListObjectsPage {
    /// `None` when the store omitted the contents payload altogether.
    pub contents: Option<Vec<StoreObject>>,
    pub is_truncated: bool,
    /// Continuation token for the next page, opaque to callers.
    pub next_marker: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Fetch up to `max_keys` entries under `prefix` that follow `marker`.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        marker: &str,
        max_keys: usize,
    ) -> Result<ListObjectsPage, StoreError>;

    /// Open the object body as a byte stream.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectStream, StoreError>;

    /// Write the object to `dest`, replacing any existing file.
    async fn download_file(&self, bucket: &str, key: &str, dest: &Path) -> Result<(), StoreError> {
        let body = self.get_object(bucket, key).await?;
        write_stream_to_path(body, dest).await?;
        Ok(())
    }
}

/// Stream bytes into `dest` through a temporary sibling file.
///
/// - Writes chunks incrementally to `.tmp-{uuid}` next to `dest`.
/// - Flushes and fsyncs before renaming into place.
/// - Removes the temp file on any error so no partial file is left at `dest`.
///
/// Returns the number of bytes written.
pub async fn write_stream_to_path(body: ObjectStream, dest: &Path) -> io::Result<u64> {
    let parent = dest
        .parent()
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "destination has no parent"))?;
    tfs::create_dir_all(parent).await?;
    let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
    let mut file = tfs::File::create(&tmp_path).await?;

    let mut written: u64 = 0;
    pin_mut!(body);
    while let Some(chunk_res) = body.next().await {
        let chunk = match chunk_res {
            Ok(chunk) => chunk,
            Err(err) => {
                let _ = tfs::remove_file(&tmp_path).await;
                return Err(err);
            }
        };
        written += chunk.len() as u64;
        if let Err(err) = file.write_all(&chunk).await {
            let _ = tfs::remove_file(&tmp_path).await;
            return Err(err);
        }
    }
    if let Err(err) = file.flush().await {
        let _ = tfs::remove_file(&tmp_path).await;
        return Err(err);
    }
    if let Err(err) = file.sync_all().await {
        let _ = tfs::remove_file(&tmp_path).await;
        return Err(err);
    }
    drop(file);

    if let Err(err) = tfs::rename(&tmp_path, dest).await {
        if err.kind() == ErrorKind::AlreadyExists {
            tfs::remove_file(dest).await?;
            tfs::rename(&tmp_path, dest).await?;
        } else {
            let _ = tfs::remove_file(&tmp_path).await;
            return Err(err);
        }
    }

    Ok(written)
}
