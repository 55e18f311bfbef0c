//! execution-origin - dedicated workers whose origin can follow the caller
//!
//! Workers run JavaScript on the Boa engine, one thread and one context each.
//! A [`Host`] stands in for the page that constructs them: its script URL,
//! its security policy, its blob store and its network access.
//!
//! [`ExecutionOriginWorker`] adds the `executionOrigin` option on top of the
//! native [`Worker`]:
//! - `"from-url"` (default): the worker URL's origin governs, so a
//!   cross-origin script is refused with an origin policy violation
//! - `"from-calling-script"`: the worker is started from a same-origin
//!   `blob:` shim that imports the real script, so cross-origin scripts load
//!   under the normal import rules

pub mod blob;
pub mod error;
pub mod fetch;
pub mod host;
pub mod mode;
pub mod options;
pub mod policy;
pub mod polyfill;
pub mod resource;
pub mod runtime;
pub mod shim;

// Re-export commonly used types
pub use blob::{Blob, BlobStore, ObjectUrl};
pub use error::{FetchError, LoadError, PolicyViolation, WorkerError, WorkerResult};
#[cfg(feature = "http")]
pub use fetch::HttpFetcher;
pub use fetch::{
    FetchRequest, FetchResponse, FileFetcher, RequestMode, ResourceFetcher, SchemeFetcher,
    StaticFetcher,
};
pub use host::{Host, HostConfig};
pub use mode::{OriginMode, OriginModeResolver};
pub use options::{Credentials, ExecutionOrigin, ScriptType, WorkerOptions};
pub use policy::{ContentSecurityPolicy, SecurityPolicy, SourceExpression};
pub use polyfill::ExecutionOriginWorker;
pub use resource::ResourceReference;
pub use runtime::worker::{ErrorEvent, ErrorEventKind, Worker, WorkerEvent, WorkerState};
pub use runtime::{RuntimeError, RuntimeResult, WorkerConsole};
pub use shim::IntermediateResourceBuilder;
