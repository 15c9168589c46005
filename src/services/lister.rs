//! Remote lister: flattens a marker-paginated store listing into one
//! sequence of [`RemoteObject`]s, plus the post-listing filter policy.

use crate::{
    errors::ListingError,
    models::{
        RemoteObject,
        remote_object::{DEFAULT_STORAGE_CLASS, unquote_etag},
    },
    store::{ObjectStoreClient, StoreObject},
};
use std::{path::Path, sync::Arc};
use tracing::{debug, info, warn};

/// Result of a full listing.
///
/// `complete` is false when enumeration stopped early; callers must then
/// treat `objects` as a possible undercount.
#[derive(Debug)]
pub struct Listing {
    pub objects: Vec<RemoteObject>,
    pub complete: bool,
    pub error: Option<ListingError>,
}

#[derive(Clone)]
pub struct RemoteLister {
    client: Arc<dyn ObjectStoreClient>,
}

impl RemoteLister {
    pub fn new(client: Arc<dyn ObjectStoreClient>) -> Self {
        Self { client }
    }

    /// Enumerate every object under `prefix`, `page_size` keys per request.
    ///
    /// The continuation marker is always the one the store returned, used
    /// verbatim. A store error ends the listing with what was gathered so far.
    pub async fn list(&self, bucket: &str, prefix: &str, page_size: usize) -> Listing {
        let mut objects = Vec::new();
        let mut marker = String::new();
        let mut pages = 0usize;

        loop {
            let page = match self
                .client
                .list_objects(bucket, prefix, &marker, page_size)
                .await
            {
                Ok(page) => page,
                Err(source) => {
                    let error = ListingError {
                        bucket: bucket.to_string(),
                        gathered: objects.len(),
                        source,
                    };
                    warn!("{error}");
                    return Listing {
                        objects,
                        complete: false,
                        error: Some(error),
                    };
                }
            };
            pages += 1;

            let Some(contents) = page.contents else {
                debug!("page {pages} of `{bucket}` has no contents");
                break;
            };
            objects.extend(contents.into_iter().map(normalize));
            debug!("fetched {} objects after {pages} pages", objects.len());

            if !page.is_truncated {
                break;
            }
            match page.next_marker {
                Some(next) if !next.is_empty() => marker = next,
                _ => {
                    warn!(
                        "listing of `{bucket}` is truncated but the store supplied no marker; \
                         stopping at {} objects",
                        objects.len()
                    );
                    return Listing {
                        objects,
                        complete: false,
                        error: None,
                    };
                }
            }
        }

        info!("listed {} objects in `{bucket}`", objects.len());
        Listing {
            objects,
            complete: true,
            error: None,
        }
    }
}

fn normalize(raw: StoreObject) -> RemoteObject {
    RemoteObject {
        entity_tag: unquote_etag(&raw.etag),
        key: raw.key,
        size: raw.size,
        last_modified: raw.last_modified,
        storage_class: raw
            .storage_class
            .unwrap_or_else(|| DEFAULT_STORAGE_CLASS.to_string()),
    }
}

/// Extension and size policy applied after listing, never pushed to the store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectFilter {
    /// Lower-case extensions with a leading dot. Empty allows everything.
    pub extensions: Vec<String>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
}

impl ObjectFilter {
    /// Accepts extensions as `mp3`, `.mp3` or `.MP3`.
    pub fn new(extensions: &[String], min_size: Option<u64>, max_size: Option<u64>) -> Self {
        let extensions = extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .map(|ext| format!(".{ext}"))
            .collect();
        Self {
            extensions,
            min_size,
            max_size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty() && self.min_size.is_none() && self.max_size.is_none()
    }

    pub fn matches(&self, obj: &RemoteObject) -> bool {
        if !self.extensions.is_empty() {
            let ext = Path::new(obj.file_name())
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| format!(".{}", e.to_ascii_lowercase()));
            match ext {
                Some(ext) if self.extensions.contains(&ext) => {}
                _ => return false,
            }
        }
        if self.min_size.is_some_and(|min| obj.size < min) {
            return false;
        }
        if self.max_size.is_some_and(|max| obj.size > max) {
            return false;
        }
        true
    }

    pub fn apply(&self, objects: Vec<RemoteObject>) -> Vec<RemoteObject> {
        if self.is_empty() {
            return objects;
        }
        objects.into_iter().filter(|o| self.matches(o)).collect()
    }
}
