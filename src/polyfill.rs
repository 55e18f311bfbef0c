//! Workers that can run under the calling script's origin
//!
//! [`ExecutionOriginWorker`] wraps a native [`Worker`]. With
//! `executionOrigin: "from-calling-script"` the worker is started from a
//! same-origin load shim instead of the target URL, so the worker origin
//! check passes and the shim pulls the real script in with an ordinary
//! import. Without it, construction is exactly the native one.

use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::blob::ObjectUrl;
use crate::error::WorkerResult;
use crate::host::Host;
use crate::mode::{OriginMode, OriginModeResolver};
use crate::options::WorkerOptions;
use crate::resource::ResourceReference;
use crate::runtime::worker::{Worker, WorkerEvent, WorkerState};
use crate::shim::IntermediateResourceBuilder;

/// A [`Worker`] whose origin can be inherited from the calling script
#[derive(Debug)]
pub struct ExecutionOriginWorker {
    worker: Worker,
    /// Load shim the worker was started from. The worker thread holds it
    /// until it has fetched it; it is revoked once both let go.
    shim: Option<Arc<ObjectUrl>>,
    script_url: Url,
    mode: OriginMode,
}

impl ExecutionOriginWorker {
    pub fn new(
        host: &Host,
        resource: impl Into<ResourceReference>,
        options: WorkerOptions,
    ) -> WorkerResult<Self> {
        let mode = OriginModeResolver::resolve(Some(&options));
        let script_url = resource.into().resolve(host.script_url())?;

        // The shim lives at a blob: URL, so it must carry an absolute target
        let shim = match mode {
            OriginMode::InheritOrigin => Some(Arc::new(
                IntermediateResourceBuilder::for_host(host)
                    .build(&ResourceReference::Url(script_url.clone()), options.script_type),
            )),
            OriginMode::UrlOrigin => None,
        };
        let effective = shim
            .as_ref()
            .map_or_else(|| script_url.clone(), |shim| shim.url().clone());

        debug!(target_url = %script_url, worker_url = %effective, ?mode, "constructing worker");
        let worker = Worker::spawn(
            host,
            effective,
            &options.without_execution_origin(),
            shim.clone(),
        )?;

        Ok(Self {
            worker,
            shim,
            script_url,
            mode,
        })
    }

    /// The URL the caller asked for, even when the worker runs from a shim
    pub fn script_url(&self) -> &Url {
        &self.script_url
    }

    /// The URL the underlying worker was started from
    pub fn url(&self) -> &Url {
        self.worker.url()
    }

    pub fn mode(&self) -> OriginMode {
        self.mode
    }

    pub fn shim_url(&self) -> Option<&Url> {
        self.shim.as_deref().map(ObjectUrl::url)
    }

    pub fn id(&self) -> u32 {
        self.worker.id()
    }

    pub fn state(&self) -> WorkerState {
        self.worker.state()
    }

    pub fn post_message(&self, data: impl Into<serde_json::Value>) {
        self.worker.post_message(data);
    }

    pub async fn next_event(&mut self) -> Option<WorkerEvent> {
        self.worker.next_event().await
    }

    pub fn blocking_next_event(&mut self) -> Option<WorkerEvent> {
        self.worker.blocking_next_event()
    }

    pub fn try_next_event(&mut self) -> Option<WorkerEvent> {
        self.worker.try_next_event()
    }

    /// Stop the worker and release its load shim
    pub fn terminate(&mut self) {
        self.worker.terminate();
        self.shim = None;
    }

    pub fn join(&mut self) {
        self.worker.join();
    }

    /// The wrapped native worker
    pub fn inner(&self) -> &Worker {
        &self.worker
    }
}
