//! Represents an object (file) as enumerated from the remote store.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Storage class assumed when the store does not report one.
pub const DEFAULT_STORAGE_CLASS: &str = "STANDARD";

/// A single object discovered by the remote lister.
///
/// Only the lister produces these, after normalizing the raw store entry.
/// Immutable for the lifetime of one listing.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RemoteObject {
    /// Object key (path-like identifier within the bucket). Unique.
    pub key: String,

    /// Total size in bytes.
    pub size: u64,

    /// Content fingerprint supplied by the store, surrounding quotes removed.
    pub entity_tag: String,

    /// Timestamp when the object was last modified remotely.
    pub last_modified: DateTime<Utc>,

    /// Storage class (e.g., STANDARD, ARCHIVE).
    pub storage_class: String,
}

impl RemoteObject {
    /// Final path segment of the key.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }

    /// Zero-byte `folder/` placeholder created by consoles and sync tools.
    pub fn is_directory_marker(&self) -> bool {
        self.size == 0 && self.key.ends_with('/')
    }
}

/// Strip the surrounding quote characters stores put around entity tags.
pub fn unquote_etag(raw: &str) -> String {
    raw.trim().trim_matches('"').to_string()
}

/// Flat inventory row written by the `--inventory` export.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub last_modified: String,
    pub etag: String,
    pub storage_class: String,
}

impl From<&RemoteObject> for ObjectInfo {
    fn from(obj: &RemoteObject) -> Self {
        Self {
            key: obj.key.clone(),
            size: obj.size,
            last_modified: obj
                .last_modified
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            etag: obj.entity_tag.clone(),
            storage_class: obj.storage_class.clone(),
        }
    }
}
