//! Error taxonomy for the mirror.
//!
//! Only [`ConfigError`] (and client initialization) is fatal to a run. Listing
//! errors degrade to a partial listing; transfer and index errors are scoped
//! to the single object that hit them.

use std::io;
use thiserror::Error;

/// Missing or malformed configuration. Aborts before any listing begins.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file `{path}`: {source}")]
    Read { path: String, source: io::Error },
    #[error("parsing config file `{path}`: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("invalid value for `{name}`: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Failure reported by an object-store client.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("invalid marker `{0}`")]
    InvalidMarker(String),
    #[error("object store service error: {0}")]
    Service(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Enumeration failure. Never fatal: the listing is truncated to what was
/// gathered before the error.
#[derive(Debug, Error)]
#[error("listing `{bucket}` stopped after {gathered} objects: {source}")]
pub struct ListingError {
    pub bucket: String,
    pub gathered: usize,
    #[source]
    pub source: StoreError,
}

/// Per-object download failure.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("expected {expected} bytes, wrote {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("object key `{0}` cannot be mapped to a local path")]
    InvalidKey(String),
}

/// Durable index failure. Treated as a failure of the affected object.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("file size {0} exceeds the index column range")]
    SizeOutOfRange(u64),
}

pub type IndexResult<T> = Result<T, IndexError>;

/// Top-level error for a whole mirror run.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("object store client initialization failed: {0}")]
    Client(String),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl MirrorError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MirrorError::Config(_) | MirrorError::Client(_) => 2,
            MirrorError::Index(_) | MirrorError::Io(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors_map_to_distinct_exit_codes() {
        assert_eq!(MirrorError::from(ConfigError::Missing("bucket")).exit_code(), 2);
        assert_eq!(MirrorError::Client("no region".into()).exit_code(), 2);
        let io = io::Error::other("disk gone");
        assert_eq!(MirrorError::from(io).exit_code(), 1);
    }

    #[test]
    fn listing_error_mentions_progress() {
        let err = ListingError {
            bucket: "media".into(),
            gathered: 42,
            source: StoreError::Service("503 SlowDown".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("media"));
        assert!(msg.contains("42"));
    }
}
