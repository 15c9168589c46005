//! Provenance metadata for a locally materialized file.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One row of the local index.
///
/// A record exists only once a download of `remote_key`/`entity_tag` has
/// completed and the upsert was committed. Column names follow the on-disk
/// schema in `migrations/0001_init.sql`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct IndexRecord {
    /// Local file path. Primary key.
    #[sqlx(rename = "file_path")]
    pub local_path: String,

    /// Size of the local file in bytes.
    #[sqlx(try_from = "i64")]
    pub file_size: u64,

    /// On-disk modification time, ISO-8601.
    pub last_modified: String,

    /// MD5 hex digest of the local bytes.
    #[sqlx(rename = "md5_hash")]
    pub content_hash: String,

    /// Set by the index at upsert time; any caller-supplied value is replaced.
    pub download_time: String,

    /// Key of the remote object this file was downloaded from.
    pub remote_key: String,

    /// Unquoted entity tag of the remote object at download time.
    #[sqlx(rename = "etag")]
    pub entity_tag: String,
}
