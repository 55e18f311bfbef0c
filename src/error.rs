//! Error types
//!
//! Uses `thiserror` for error definitions and `miette` for diagnostics.
//!
//! Only [`WorkerError`] is ever returned synchronously from a constructor.
//! Policy violations and load failures happen on the worker thread and reach
//! the caller as [`ErrorEvent`](crate::ErrorEvent)s.

use miette::Diagnostic;
use thiserror::Error;
use url::Url;

/// Errors raised synchronously while constructing a worker
#[derive(Error, Diagnostic, Debug)]
pub enum WorkerError {
    #[error("Failed to parse worker script URL '{input}': {source}")]
    #[diagnostic(
        code(execution_origin::invalid_url),
        help("Relative URLs are resolved against the host script URL")
    )]
    InvalidUrl {
        input: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Invalid worker options: {0}")]
    #[diagnostic(
        code(execution_origin::invalid_options),
        help("`type` must be \"classic\" or \"module\"; `credentials` must be \"omit\", \"same-origin\" or \"include\"")
    )]
    InvalidOptions(#[source] serde_json::Error),

    #[error("Failed to spawn worker thread: {0}")]
    #[diagnostic(code(execution_origin::spawn_failed))]
    Spawn(#[from] std::io::Error),
}

/// Result type for worker construction
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors produced by a [`ResourceFetcher`](crate::ResourceFetcher)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Resource not found: {0}")]
    NotFound(Url),

    #[error("Unsupported URL scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("HTTP status {status} for {url}")]
    Status { url: Url, status: u16 },

    #[error("Network error for {url}: {reason}")]
    Network { url: Url, reason: String },

    #[error("Cross-origin request to {url} blocked: {reason}")]
    Cors { url: Url, reason: String },

    #[error("Failed to read {url}: {reason}")]
    Io { url: Url, reason: String },
}

/// A load refused by the security policy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Refused to load '{url}' ({directive}): {reason}")]
pub struct PolicyViolation {
    pub url: Url,
    /// The rule that rejected the load, e.g. `worker-src` or `same-origin`
    pub directive: String,
    pub reason: String,
}

/// Why a script could not be obtained
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error(transparent)]
    Policy(#[from] PolicyViolation),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}
