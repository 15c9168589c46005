//! Sync pipeline: list, diff, download, index.

pub mod coordinator;
pub mod differ;
pub mod downloader;
pub mod index_service;
pub mod lister;
