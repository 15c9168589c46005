//! Core data models for the mirror.
//!
//! Remote objects come from the lister, index records map cleanly to the
//! SQLite table via `sqlx::FromRow`, and reports serialize as JSON via `serde`.

pub mod index_record;
pub mod remote_object;
pub mod report;

pub use index_record::IndexRecord;
pub use remote_object::{ObjectInfo, RemoteObject, unquote_etag};
pub use report::{DownloadOutcome, DownloadReport, DownloadStats, ReportConfig, SkipReason};
