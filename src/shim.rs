//! Same-origin load shims
//!
//! A shim is a one-statement `blob:` script owned by the calling script's
//! origin. Starting a worker from it makes the worker's origin checks see the
//! caller's origin, while the statement inside it still fetches the real
//! target: `importScripts()` for classic workers, a static `import` for
//! module workers.

use tracing::debug;
use url::Origin;

use crate::blob::{Blob, BlobStore, ObjectUrl};
use crate::host::Host;
use crate::options::ScriptType;
use crate::resource::ResourceReference;

pub const SHIM_CONTENT_TYPE: &str = "text/javascript";

/// Builds load shims in a blob store under a fixed owner origin
#[derive(Debug, Clone)]
pub struct IntermediateResourceBuilder {
    store: BlobStore,
    origin: Origin,
}

impl IntermediateResourceBuilder {
    pub fn new(store: BlobStore, origin: Origin) -> Self {
        Self { store, origin }
    }

    /// A builder whose shims belong to the host script's origin
    pub fn for_host(host: &Host) -> Self {
        Self::new(host.blobs().clone(), host.origin().clone())
    }

    /// Create a fresh shim that loads `resource` as `script_type`
    ///
    /// Every call allocates a new object URL, even for identical arguments.
    pub fn build(&self, resource: &ResourceReference, script_type: ScriptType) -> ObjectUrl {
        let source = shim_source(resource, script_type);
        let url = self
            .store
            .create_object_url(Blob::new(source, SHIM_CONTENT_TYPE), &self.origin);
        debug!(resource = %resource, shim = %url, %script_type, "created load shim");
        ObjectUrl::new(url, self.store.clone())
    }
}

/// The shim's script text
pub fn shim_source(resource: &ResourceReference, script_type: ScriptType) -> String {
    let quoted = quote(&resource.to_string());
    match script_type {
        ScriptType::Module => format!("import {quoted};"),
        ScriptType::Classic => format!("importScripts({quoted});"),
    }
}

/// A JSON string literal is also a valid JavaScript string literal.
fn quote(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}
