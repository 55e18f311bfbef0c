//! The environment of the script that constructs workers
//!
//! A [`Host`] bundles what a browser window would provide to the `Worker`
//! constructor: the calling script's URL (base URL and origin), its security
//! policy, the blob store behind `blob:` URLs, and the network.

use std::sync::Arc;
use tracing::trace;
use url::{Origin, Url};

use crate::blob::BlobStore;
use crate::error::{FetchError, LoadError};
use crate::fetch::{FetchRequest, FetchResponse, RequestMode, ResourceFetcher, SchemeFetcher};
use crate::policy::SecurityPolicy;

/// Configuration for a [`Host`]
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// URL of the calling script; base for relative worker URLs
    pub script_url: Url,
    /// Security policy applied to workers started from this host
    pub policy: SecurityPolicy,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            script_url: Url::parse("http://localhost/").expect("static URL should parse"),
            policy: SecurityPolicy::default(),
        }
    }
}

impl HostConfig {
    pub fn with_script_url(script_url: Url) -> Self {
        Self {
            script_url,
            ..Default::default()
        }
    }

    pub fn with_policy(mut self, policy: SecurityPolicy) -> Self {
        self.policy = policy;
        self
    }
}

struct HostInner {
    script_url: Url,
    origin: Origin,
    policy: SecurityPolicy,
    blobs: BlobStore,
    fetcher: Arc<dyn ResourceFetcher>,
}

/// Shared handle to a calling-script environment
#[derive(Clone)]
pub struct Host {
    inner: Arc<HostInner>,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("script_url", &self.inner.script_url.as_str())
            .field("policy", &self.inner.policy)
            .finish_non_exhaustive()
    }
}

impl Host {
    pub fn new(config: HostConfig, fetcher: impl ResourceFetcher + 'static) -> Self {
        let origin = config.script_url.origin();
        Self {
            inner: Arc::new(HostInner {
                script_url: config.script_url,
                origin,
                policy: config.policy,
                blobs: BlobStore::new(),
                fetcher: Arc::new(fetcher),
            }),
        }
    }

    /// A host that fetches `file:` and, with the `http` feature, `http(s):`
    pub fn with_standard_fetcher(config: HostConfig) -> Self {
        Self::new(config, SchemeFetcher::standard())
    }

    pub fn script_url(&self) -> &Url {
        &self.inner.script_url
    }

    pub fn origin(&self) -> &Origin {
        &self.inner.origin
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.inner.policy
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.inner.blobs
    }

    /// The origin a script at `url` runs with, as seen from this host
    ///
    /// `blob:` URLs belong to the origin that created them. `file:` URLs have
    /// opaque origins; when the host script is itself a `file:` URL they are
    /// attributed to the host's own origin value.
    pub fn origin_of(&self, url: &Url) -> Origin {
        match url.scheme() {
            "blob" => self
                .inner
                .blobs
                .origin_of(url)
                .unwrap_or_else(|| url.origin()),
            "file" if self.inner.script_url.scheme() == "file" => self.inner.origin.clone(),
            _ => url.origin(),
        }
    }

    /// Fetch a script body for a worker
    ///
    /// `blob:` URLs are served from the blob store; everything else goes
    /// through the fetcher and, for CORS requests, the CORS check.
    pub fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, LoadError> {
        trace!(url = %request.url, mode = ?request.mode, "fetching script");

        if request.url.scheme() == "blob" {
            let blob = self
                .inner
                .blobs
                .resolve(&request.url)
                .ok_or_else(|| FetchError::NotFound(request.url.clone()))?;
            return Ok(FetchResponse {
                url: request.url.clone(),
                body: blob.content.clone(),
                content_type: Some(blob.content_type.clone()),
                allow_origin: None,
                allow_credentials: false,
            });
        }

        let response = self.inner.fetcher.fetch(request)?;
        if self.origin_of(&request.url) != request.initiator {
            response.check_cors(request)?;
        }
        Ok(response)
    }

    /// Fetch a script pulled in by a running worker owned by `owner`,
    /// enforcing `script-src` first
    pub fn fetch_import(
        &self,
        owner: &Origin,
        request: &FetchRequest,
    ) -> Result<FetchResponse, LoadError> {
        debug_assert!(request.mode != RequestMode::SameOrigin);
        self.inner.policy.check_script(owner, &request.url)?;
        self.fetch(request)
    }
}
