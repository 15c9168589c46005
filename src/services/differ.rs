//! Sync differ: classify a remote snapshot against the local index.

use crate::models::{IndexRecord, RemoteObject, unquote_etag};
use std::collections::{HashMap, HashSet};

/// Remote objects that need downloading plus index records with no remote
/// counterpart. Recomputed on every sync.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncDiff {
    pub new: Vec<RemoteObject>,
    pub updated: Vec<RemoteObject>,
    /// Informational; nothing is deleted by computing the diff.
    pub deleted: Vec<IndexRecord>,
}

impl SyncDiff {
    /// `new` followed by `updated`.
    pub fn to_download(&self) -> Vec<RemoteObject> {
        self.new.iter().chain(&self.updated).cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Compare by (key, etag) in O(R + L).
///
/// Identity is the remote key, never the local path, so a record whose file
/// was moved locally still counts as present. A key may have several records
/// (one per local path); it is unchanged if any of them holds the current
/// etag. Output order follows input order.
pub fn compare(remote: &[RemoteObject], local: &[IndexRecord]) -> SyncDiff {
    let mut etags_by_key: HashMap<&str, HashSet<&str>> = HashMap::new();
    for record in local {
        etags_by_key
            .entry(record.remote_key.as_str())
            .or_default()
            .insert(record.entity_tag.as_str());
    }
    let remote_keys: HashSet<&str> = remote.iter().map(|obj| obj.key.as_str()).collect();

    let mut diff = SyncDiff::default();
    for obj in remote {
        match etags_by_key.get(obj.key.as_str()) {
            None => diff.new.push(obj.clone()),
            Some(etags) if !etags.contains(unquote_etag(&obj.entity_tag).as_str()) => {
                diff.updated.push(obj.clone())
            }
            Some(_) => {}
        }
    }

    diff.deleted = local
        .iter()
        .filter(|record| !remote_keys.contains(record.remote_key.as_str()))
        .cloned()
        .collect();

    diff
}
