//! src/store/fs.rs
//!
//! FsObjectStore — serves buckets laid out as plain directories beneath
//! `base_path/{bucket}/{key}`. Used to mirror a mounted bucket and as a
//! realistic store in tests. Entity tags are the quoted MD5 of the payload and
//! continuation markers are opaque base64 tokens, like a real service.

use super::{ListObjectsPage, ObjectStoreClient, ObjectStream, StoreObject};
use crate::errors::StoreError;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use md5::Context;
use std::{
    collections::BTreeSet,
    io::{self, Read},
    path::{Path, PathBuf},
};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const MAX_KEYS_PER_PAGE: usize = 1000;
const TMP_PREFIX: &str = ".tmp-";

#[derive(Clone, Debug)]
pub struct FsObjectStore {
    /// Directory whose immediate children are buckets.
    pub base_path: PathBuf,
}

impl FsObjectStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Reject keys that could escape the bucket directory.
    fn ensure_key_safe(key: &str) -> Result<(), StoreError> {
        let invalid = || StoreError::InvalidKey(key.to_string());
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(invalid());
        }
        if key.starts_with('/') || key.split('/').any(|seg| seg == "..") {
            return Err(invalid());
        }
        if key.bytes().any(|b| b.is_ascii_control() || b == b'\\') {
            return Err(invalid());
        }
        Ok(())
    }

    fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.base_path.join(bucket)
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let mut path = self.bucket_root(bucket);
        for segment in key.split('/') {
            path.push(segment);
        }
        path
    }

    fn encode_marker(key: &str) -> String {
        general_purpose::STANDARD.encode(key)
    }

    fn decode_marker(marker: &str) -> Result<String, StoreError> {
        general_purpose::STANDARD
            .decode(marker)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or_else(|| StoreError::InvalidMarker(marker.to_string()))
    }
}

#[async_trait]
impl ObjectStoreClient for FsObjectStore {
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        marker: &str,
        max_keys: usize,
    ) -> Result<ListObjectsPage, StoreError> {
        let root = self.bucket_root(bucket);
        if !tokio::fs::try_exists(&root).await? {
            return Err(StoreError::BucketNotFound(bucket.to_string()));
        }
        let after = if marker.is_empty() {
            None
        } else {
            Some(Self::decode_marker(marker)?)
        };
        let max_keys = max_keys.clamp(1, MAX_KEYS_PER_PAGE);
        let prefix = prefix.to_string();

        tokio::task::spawn_blocking(move || {
            let keys = collect_keys(&root)?;
            let mut page: Vec<(String, PathBuf)> = keys
                .into_iter()
                .filter(|key| key.starts_with(&prefix))
                .filter(|key| after.as_deref().is_none_or(|a| key.as_str() > a))
                .take(max_keys + 1)
                .map(|key| {
                    let path = key.split('/').fold(root.clone(), |p, seg| p.join(seg));
                    (key, path)
                })
                .collect();

            let is_truncated = page.len() > max_keys;
            if is_truncated {
                page.pop();
            }
            let next_marker = if is_truncated {
                page.last().map(|(key, _)| Self::encode_marker(key))
            } else {
                None
            };

            let mut contents = Vec::with_capacity(page.len());
            for (key, path) in page {
                let meta = std::fs::metadata(&path)?;
                let last_modified: DateTime<Utc> = meta.modified()?.into();
                contents.push(StoreObject {
                    key,
                    size: meta.len(),
                    etag: format!("\"{}\"", md5_file(&path)?),
                    last_modified,
                    storage_class: None,
                });
            }

            Ok(ListObjectsPage {
                contents: (!contents.is_empty()).then_some(contents),
                is_truncated,
                next_marker,
            })
        })
        .await
        .map_err(|err| StoreError::Service(format!("listing task failed: {err}")))?
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectStream, StoreError> {
        Self::ensure_key_safe(key)?;
        let path = self.object_path(bucket, key);
        let file = File::open(&path).await.map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                StoreError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                StoreError::Io(err)
            }
        })?;
        Ok(ReaderStream::new(file).boxed())
    }
}

/// Every regular file under `root` as a `/`-separated key, sorted.
fn collect_keys(root: &Path) -> io::Result<BTreeSet<String>> {
    let mut keys = BTreeSet::new();
    let mut pending = vec![(root.to_path_buf(), String::new())];
    while let Some((dir, key_prefix)) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with(TMP_PREFIX) {
                continue;
            }
            let key = format!("{key_prefix}{name}");
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push((entry.path(), format!("{key}/")));
            } else if file_type.is_file() {
                keys.insert(key);
            }
        }
    }
    Ok(keys)
}

fn md5_file(path: &Path) -> io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut digest = Context::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        digest.consume(&buf[..n]);
    }
    Ok(format!("{:x}", digest.compute()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(base: &Path, files: &[(&str, &[u8])]) {
        for (key, body) in files {
            let path = base.join("bucket").join(key);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, body).unwrap();
        }
    }

    #[tokio::test]
    async fn pages_with_opaque_markers() {
        let dir = tempfile::tempdir().unwrap();
        seed(
            dir.path(),
            &[("a.txt", b"a"), ("b/c.txt", b"cc"), ("b/d.txt", b"ddd")],
        );
        let store = FsObjectStore::new(dir.path());

        let first = store.list_objects("bucket", "", "", 2).await.unwrap();
        let keys: Vec<_> = first
            .contents
            .as_ref()
            .unwrap()
            .iter()
            .map(|o| o.key.as_str())
            .collect();
        assert_eq!(keys, ["a.txt", "b/c.txt"]);
        assert!(first.is_truncated);
        let marker = first.next_marker.unwrap();
        assert_ne!(marker, "b/c.txt");

        let second = store.list_objects("bucket", "", &marker, 2).await.unwrap();
        let contents = second.contents.unwrap();
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].key, "b/d.txt");
        assert_eq!(contents[0].size, 3);
        assert!(!second.is_truncated);
        assert!(second.next_marker.is_none());
    }

    #[tokio::test]
    async fn etag_is_quoted_md5_and_prefix_filters() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path(), &[("logs/x.log", b"hello world"), ("y.txt", b"y")]);
        let store = FsObjectStore::new(dir.path());

        let page = store.list_objects("bucket", "logs/", "", 100).await.unwrap();
        let contents = page.contents.unwrap();
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].etag, "\"5eb63bbbe01eeed093cb22bb8f5acdc3\"");

        let empty = store.list_objects("bucket", "nope/", "", 100).await.unwrap();
        assert!(empty.contents.is_none());
    }

    #[tokio::test]
    async fn missing_bucket_and_bad_marker_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path(), &[("a.txt", b"a")]);
        let store = FsObjectStore::new(dir.path());

        assert!(matches!(
            store.list_objects("other", "", "", 10).await,
            Err(StoreError::BucketNotFound(_))
        ));
        assert!(matches!(
            store.list_objects("bucket", "", "***", 10).await,
            Err(StoreError::InvalidMarker(_))
        ));
    }

    #[tokio::test]
    async fn download_file_copies_bytes() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path(), &[("deep/path/obj.bin", b"payload")]);
        let store = FsObjectStore::new(dir.path());
        let out = tempfile::tempdir().unwrap();
        let dest = out.path().join("obj.bin");

        store
            .download_file("bucket", "deep/path/obj.bin", &dest)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"payload");

        let missing = store.download_file("bucket", "absent", &dest).await;
        assert!(matches!(missing, Err(StoreError::ObjectNotFound { .. })));
        assert!(store.get_object("bucket", "../escape").await.is_err());
    }
}
