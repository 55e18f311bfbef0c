//! Script fetching
//!
//! Workers obtain script bodies through a [`ResourceFetcher`]. `blob:` URLs
//! never reach a fetcher; the [`Host`](crate::Host) answers them from its
//! blob store.

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use http::HttpFetcher;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use url::{Origin, Url};

use crate::error::FetchError;
use crate::options::Credentials;

/// Request mode, as in the Fetch standard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    /// Top-level worker scripts
    SameOrigin,
    /// Classic `importScripts()`
    NoCors,
    /// Module imports
    Cors,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: Url,
    pub mode: RequestMode,
    pub credentials: Credentials,
    /// Origin of the environment issuing the request
    pub initiator: Origin,
}

impl FetchRequest {
    /// Whether cookies and similar credentials accompany the request
    pub fn includes_credentials(&self) -> bool {
        match self.credentials {
            Credentials::Omit => false,
            Credentials::SameOrigin => self.url.origin() == self.initiator,
            Credentials::Include => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// Final URL after redirects
    pub url: Url,
    pub body: String,
    pub content_type: Option<String>,
    /// `Access-Control-Allow-Origin`
    pub allow_origin: Option<String>,
    /// `Access-Control-Allow-Credentials: true`
    pub allow_credentials: bool,
}

impl FetchResponse {
    pub fn javascript(url: Url, body: impl Into<String>) -> Self {
        Self {
            url,
            body: body.into(),
            content_type: Some("text/javascript".to_string()),
            allow_origin: None,
            allow_credentials: false,
        }
    }

    pub fn with_allow_origin(mut self, allow_origin: impl Into<String>) -> Self {
        self.allow_origin = Some(allow_origin.into());
        self
    }

    pub fn with_allow_credentials(mut self) -> Self {
        self.allow_credentials = true;
        self
    }

    /// CORS check for a response to `request`
    pub fn check_cors(&self, request: &FetchRequest) -> Result<(), FetchError> {
        if request.mode != RequestMode::Cors || request.url.origin() == request.initiator {
            return Ok(());
        }
        let blocked = |reason: String| FetchError::Cors {
            url: request.url.clone(),
            reason,
        };

        let initiator = request.initiator.ascii_serialization();
        let credentialed = request.includes_credentials();
        match self.allow_origin.as_deref() {
            None => Err(blocked("no Access-Control-Allow-Origin header".to_string())),
            Some("*") if credentialed => Err(blocked(
                "wildcard Access-Control-Allow-Origin on a credentialed request".to_string(),
            )),
            Some("*") => Ok(()),
            Some(allowed) if allowed != initiator => Err(blocked(format!(
                "Access-Control-Allow-Origin '{allowed}' does not match '{initiator}'"
            ))),
            Some(_) if credentialed && !self.allow_credentials => Err(blocked(
                "missing Access-Control-Allow-Credentials on a credentialed request".to_string(),
            )),
            Some(_) => Ok(()),
        }
    }
}

/// Fetches script bodies for workers
///
/// Called from worker threads, so implementations must be thread-safe and
/// are allowed to block.
pub trait ResourceFetcher: Send + Sync {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError>;
}

impl<F: ResourceFetcher + ?Sized> ResourceFetcher for Arc<F> {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        (**self).fetch(request)
    }
}

/// Serves fixed responses from memory
#[derive(Debug, Clone, Default)]
pub struct StaticFetcher {
    responses: Arc<RwLock<HashMap<Url, FetchResponse>>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, response: FetchResponse) {
        self.responses.write().insert(response.url.clone(), response);
    }

    /// Serve `body` as JavaScript at `url`
    pub fn with_script(self, url: Url, body: impl Into<String>) -> Self {
        self.insert(FetchResponse::javascript(url, body));
        self
    }

    /// Serve `body` as JavaScript at `url`, readable cross-origin by anyone
    pub fn with_public_script(self, url: Url, body: impl Into<String>) -> Self {
        self.insert(FetchResponse::javascript(url, body).with_allow_origin("*"));
        self
    }
}

impl ResourceFetcher for StaticFetcher {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let mut key = request.url.clone();
        key.set_fragment(None);
        self.responses
            .read()
            .get(&key)
            .cloned()
            .ok_or(FetchError::NotFound(request.url.clone()))
    }
}

/// Reads `file:` URLs from the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FileFetcher;

impl ResourceFetcher for FileFetcher {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let url = &request.url;
        if url.scheme() != "file" {
            return Err(FetchError::UnsupportedScheme(url.scheme().to_string()));
        }
        let path = url
            .to_file_path()
            .map_err(|_| FetchError::NotFound(url.clone()))?;
        let body = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FetchError::NotFound(url.clone()),
            _ => FetchError::Io {
                url: url.clone(),
                reason: e.to_string(),
            },
        })?;
        Ok(FetchResponse::javascript(url.clone(), body))
    }
}

/// Routes requests to a fetcher by URL scheme
#[derive(Clone, Default)]
pub struct SchemeFetcher {
    routes: HashMap<String, Arc<dyn ResourceFetcher>>,
}

impl SchemeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, scheme: &str, fetcher: impl ResourceFetcher + 'static) -> Self {
        self.routes.insert(scheme.to_string(), Arc::new(fetcher));
        self
    }

    /// `file:` through [`FileFetcher`] and, with the `http` feature,
    /// `http:`/`https:` through [`HttpFetcher`]
    pub fn standard() -> Self {
        let fetcher = Self::new().route("file", FileFetcher);
        #[cfg(feature = "http")]
        let fetcher = {
            let http = HttpFetcher::new();
            fetcher.route("http", http.clone()).route("https", http)
        };
        fetcher
    }
}

impl ResourceFetcher for SchemeFetcher {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        match self.routes.get(request.url.scheme()) {
            Some(fetcher) => fetcher.fetch(request),
            None => Err(FetchError::UnsupportedScheme(request.url.scheme().to_string())),
        }
    }
}
