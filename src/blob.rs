//! In-memory blob store backing `blob:` object URLs
//!
//! An object URL embeds the serialized origin of its creator
//! (`blob:http://localhost:8080/<uuid>`). Opaque origins serialize as
//! `null`, and `Url::origin()` hands out a fresh opaque origin on every call,
//! so the store also keeps the creator's `Origin` value for each entry.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use url::{Origin, Url};
use uuid::Uuid;

/// Immutable blob contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub content: String,
    pub content_type: String,
}

impl Blob {
    pub fn new(content: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            content_type: content_type.into(),
        }
    }

    pub fn javascript(content: impl Into<String>) -> Self {
        Self::new(content, "text/javascript")
    }
}

#[derive(Debug)]
struct BlobEntry {
    blob: Arc<Blob>,
    origin: Origin,
}

/// Shared registry of object URLs; clones refer to the same store
#[derive(Debug, Clone, Default)]
pub struct BlobStore {
    entries: Arc<Mutex<HashMap<String, BlobEntry>>>,
}

/// Lookup key of a blob URL; fragments never take part
fn entry_key(url: &Url) -> String {
    let mut key = url.clone();
    key.set_fragment(None);
    key.into()
}

impl BlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `blob` and return a new object URL owned by `origin`
    pub fn create_object_url(&self, blob: Blob, origin: &Origin) -> Url {
        let raw = format!("blob:{}/{}", origin.ascii_serialization(), Uuid::new_v4());
        let url = Url::parse(&raw).expect("origin serialization followed by a UUID should always parse");
        let entry = BlobEntry {
            blob: Arc::new(blob),
            origin: origin.clone(),
        };
        self.entries.lock().insert(entry_key(&url), entry);
        url
    }

    pub fn resolve(&self, url: &Url) -> Option<Arc<Blob>> {
        if url.scheme() != "blob" {
            return None;
        }
        self.entries
            .lock()
            .get(&entry_key(url))
            .map(|entry| Arc::clone(&entry.blob))
    }

    /// The origin that created the entry behind `url`
    pub fn origin_of(&self, url: &Url) -> Option<Origin> {
        if url.scheme() != "blob" {
            return None;
        }
        self.entries
            .lock()
            .get(&entry_key(url))
            .map(|entry| entry.origin.clone())
    }

    /// Returns whether an entry was removed
    pub fn revoke(&self, url: &Url) -> bool {
        self.entries.lock().remove(&entry_key(url)).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// An object URL revoked when dropped
#[derive(Debug)]
pub struct ObjectUrl {
    url: Url,
    store: BlobStore,
}

impl ObjectUrl {
    pub(crate) fn new(url: Url, store: BlobStore) -> Self {
        Self { url, store }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl Drop for ObjectUrl {
    fn drop(&mut self) {
        self.store.revoke(&self.url);
    }
}
