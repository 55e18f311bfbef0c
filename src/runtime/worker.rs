//! Worker API - dedicated workers on their own threads
//!
//! `Worker::new` only resolves the script URL and spawns a thread; the
//! origin check, the fetch and the evaluation all happen on that thread and
//! report back through events:
//! - `WorkerEvent::Message` for every `postMessage()` from the worker
//! - `WorkerEvent::Error` for a refused or failed load, or an exception
//!   escaping a message handler
//!
//! A worker ends on `terminate()`, on `self.close()`, when its handle is
//! dropped, or after a failed load. Its event stream then ends as well;
//! after `terminate()` nothing more is delivered, even if the worker was
//! still loading.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, trace, warn};
use url::Url;

use crate::blob::ObjectUrl;
use crate::error::WorkerResult;
use crate::fetch::{FetchRequest, RequestMode};
use crate::host::Host;
use crate::options::{Credentials, ScriptType, WorkerOptions};
use crate::resource::ResourceReference;
use crate::runtime::{WorkerRuntime, WorkerScope};

// ============================================================================
// Events
// ============================================================================

/// Something a worker reports to its parent
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// Data passed to `postMessage()` inside the worker
    Message(serde_json::Value),
    Error(ErrorEvent),
}

/// Classifies [`ErrorEvent`]s
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorEventKind {
    /// The worker URL was refused by an origin-based check
    OriginPolicyViolation,
    /// The worker script, or something it imports, failed to fetch, parse or run
    ResourceLoadFailure,
    /// A message handler threw after the worker loaded
    UncaughtException,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub kind: ErrorEventKind,
    pub message: String,
    /// URL of the worker script
    pub filename: String,
}

impl ErrorEvent {
    pub fn is_policy_violation(&self) -> bool {
        self.kind == ErrorEventKind::OriginPolicyViolation
    }
}

impl WorkerEvent {
    pub fn as_message(&self) -> Option<&serde_json::Value> {
        match self {
            WorkerEvent::Message(data) => Some(data),
            WorkerEvent::Error(_) => None,
        }
    }

    pub fn as_error(&self) -> Option<&ErrorEvent> {
        match self {
            WorkerEvent::Error(error) => Some(error),
            WorkerEvent::Message(_) => None,
        }
    }
}

// ============================================================================
// Worker State Management
// ============================================================================

/// Worker lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Starting = 0,
    Running = 1,
    Closing = 2,
    Closed = 3,
}

impl From<u8> for WorkerState {
    fn from(v: u8) -> Self {
        match v {
            0 => WorkerState::Starting,
            1 => WorkerState::Running,
            2 => WorkerState::Closing,
            _ => WorkerState::Closed,
        }
    }
}

/// Global worker counter for unique IDs
static WORKER_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Parent-to-worker commands
#[derive(Debug)]
enum Command {
    Message(serde_json::Value),
    Terminate,
}

/// State visible from both the handle and the worker thread
#[derive(Debug)]
struct WorkerShared {
    id: u32,
    url: Url,
    state: AtomicU8,
}

impl WorkerShared {
    fn get_state(&self) -> WorkerState {
        WorkerState::from(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn is_closing(&self) -> bool {
        self.get_state() == WorkerState::Closing
    }
}

// ============================================================================
// Worker Handle
// ============================================================================

/// Handle to a dedicated worker
#[derive(Debug)]
pub struct Worker {
    shared: Arc<WorkerShared>,
    commands: UnboundedSender<Command>,
    events: UnboundedReceiver<WorkerEvent>,
    thread: Option<JoinHandle<()>>,
    terminated: bool,
}

impl Worker {
    /// Start a worker for `resource`, resolved against the host script URL
    ///
    /// Only an unparsable URL or a failure to spawn the thread is reported
    /// here. Origin checks and loading happen asynchronously and surface as
    /// [`WorkerEvent::Error`].
    pub fn new(
        host: &Host,
        resource: impl Into<ResourceReference>,
        options: &WorkerOptions,
    ) -> WorkerResult<Self> {
        let url = resource.into().resolve(host.script_url())?;
        Self::spawn(host, url, options, None)
    }

    /// Start a worker from `url`, keeping `script` registered until the
    /// worker thread has fetched it
    pub(crate) fn spawn(
        host: &Host,
        url: Url,
        options: &WorkerOptions,
        script: Option<Arc<ObjectUrl>>,
    ) -> WorkerResult<Self> {
        let id = WORKER_COUNTER.fetch_add(1, Ordering::SeqCst);

        let shared = Arc::new(WorkerShared {
            id,
            url: url.clone(),
            state: AtomicU8::new(WorkerState::Starting as u8),
        });
        let (commands, inbox) = unbounded_channel();
        let (outbox, events) = unbounded_channel();

        debug!(worker = id, %url, script_type = %options.script_type, "starting worker");

        let thread = thread::Builder::new().name(format!("worker-{id}")).spawn({
            let host = host.clone();
            let options = options.clone();
            let shared = Arc::clone(&shared);
            move || {
                run_worker(&host, &shared, options, script, inbox, &outbox);
                // Closed must be visible before the event stream ends
                shared.set_state(WorkerState::Closed);
                drop(outbox);
            }
        })?;

        Ok(Self {
            shared,
            commands,
            events,
            thread: Some(thread),
            terminated: false,
        })
    }

    pub fn id(&self) -> u32 {
        self.shared.id
    }

    /// The URL the worker was started from
    pub fn url(&self) -> &Url {
        &self.shared.url
    }

    pub fn state(&self) -> WorkerState {
        self.shared.get_state()
    }

    /// Queue a message for the worker's `message` handlers
    ///
    /// Messages posted before the script has run are delivered once it has.
    /// Messages to a worker that has ended are dropped.
    pub fn post_message(&self, data: impl Into<serde_json::Value>) {
        if self.commands.send(Command::Message(data.into())).is_err() {
            trace!(worker = self.shared.id, "dropping message to ended worker");
        }
    }

    /// Wait for the next event; `None` once the worker has ended and every
    /// event has been received
    pub async fn next_event(&mut self) -> Option<WorkerEvent> {
        if self.terminated {
            return None;
        }
        self.events.recv().await
    }

    /// Blocking variant of [`Worker::next_event`]; panics inside an async runtime
    pub fn blocking_next_event(&mut self) -> Option<WorkerEvent> {
        if self.terminated {
            return None;
        }
        self.events.blocking_recv()
    }

    /// An already-delivered event, if any
    pub fn try_next_event(&mut self) -> Option<WorkerEvent> {
        if self.terminated {
            return None;
        }
        self.events.try_recv().ok()
    }

    /// Stop the worker after the task it is currently running
    ///
    /// Events not yet received are discarded.
    pub fn terminate(&mut self) {
        self.terminated = true;
        self.events.close();
        let _ = self.shared.state.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |state| {
            (WorkerState::from(state) != WorkerState::Closed).then_some(WorkerState::Closing as u8)
        });
        let _ = self.commands.send(Command::Terminate);
    }

    /// Wait for the worker thread to finish
    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(worker = self.shared.id, "worker thread panicked");
            }
        }
    }
}

// ============================================================================
// Worker Thread Implementation
// ============================================================================

fn report(
    outbox: &UnboundedSender<WorkerEvent>,
    shared: &WorkerShared,
    kind: ErrorEventKind,
    message: String,
) {
    if shared.is_closing() {
        debug!(worker = shared.id, ?kind, "dropping error from terminated worker");
        return;
    }
    warn!(worker = shared.id, url = %shared.url, ?kind, "{}", message);
    let _ = outbox.send(WorkerEvent::Error(ErrorEvent {
        kind,
        message,
        filename: shared.url.to_string(),
    }));
}

fn run_worker(
    host: &Host,
    shared: &WorkerShared,
    options: WorkerOptions,
    script: Option<Arc<ObjectUrl>>,
    mut inbox: UnboundedReceiver<Command>,
    outbox: &UnboundedSender<WorkerEvent>,
) {
    let url = &shared.url;
    if shared.is_closing() {
        return;
    }

    let origin = host.origin_of(url);
    if let Err(violation) = host.policy().check_worker_with_origin(host.origin(), url, &origin) {
        let message = format!("SecurityError: {violation}");
        report(outbox, shared, ErrorEventKind::OriginPolicyViolation, message);
        return;
    }

    // Classic worker scripts are always fetched with same-origin credentials
    let credentials = match options.script_type {
        ScriptType::Classic => Credentials::SameOrigin,
        ScriptType::Module => options.credentials,
    };
    let request = FetchRequest {
        url: url.clone(),
        mode: RequestMode::SameOrigin,
        credentials,
        initiator: host.origin().clone(),
    };
    let fetched = host.fetch(&request);
    drop(script);
    let response = match fetched {
        Ok(response) => response,
        Err(e) => {
            let message = format!("Failed to load worker script: {e}");
            report(outbox, shared, ErrorEventKind::ResourceLoadFailure, message);
            return;
        }
    };
    if shared.is_closing() {
        return;
    }
    if response.url != *url && host.origin_of(&response.url) != origin {
        let message = format!("Worker script redirected cross-origin to {}", response.url);
        report(outbox, shared, ErrorEventKind::ResourceLoadFailure, message);
        return;
    }

    let scope = WorkerScope::new(host.clone(), url.clone(), origin, options.clone(), outbox.clone());
    let mut runtime = match WorkerRuntime::new(scope) {
        Ok(runtime) => runtime,
        Err(e) => {
            report(outbox, shared, ErrorEventKind::ResourceLoadFailure, e.to_string());
            return;
        }
    };

    // A terminate() that raced the load keeps Closing
    let _ = shared.state.compare_exchange(
        WorkerState::Starting as u8,
        WorkerState::Running as u8,
        Ordering::SeqCst,
        Ordering::SeqCst,
    );
    if shared.is_closing() {
        return;
    }

    let evaluated = match options.script_type {
        ScriptType::Classic => runtime.evaluate_classic(&response.body, url),
        ScriptType::Module => runtime.evaluate_module(&response.body, url),
    };
    if let Err(e) = evaluated {
        report(outbox, shared, ErrorEventKind::ResourceLoadFailure, e.to_string());
        return;
    }

    while !runtime.scope().is_closing() {
        let Some(command) = inbox.blocking_recv() else {
            break;
        };
        match command {
            Command::Message(data) => {
                trace!(worker = shared.id, "dispatching message");
                if let Err(e) = runtime.dispatch_message(&data) {
                    report(outbox, shared, ErrorEventKind::UncaughtException, e.to_string());
                }
            }
            Command::Terminate => break,
        }
    }

    debug!(worker = shared.id, "worker finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_state() {
        assert_eq!(WorkerState::from(0), WorkerState::Starting);
        assert_eq!(WorkerState::from(1), WorkerState::Running);
        assert_eq!(WorkerState::from(2), WorkerState::Closing);
        assert_eq!(WorkerState::from(3), WorkerState::Closed);
        assert_eq!(WorkerState::from(255), WorkerState::Closed);
    }

    #[test]
    fn test_event_accessors() {
        let message = WorkerEvent::Message(serde_json::json!("hi"));
        assert_eq!(message.as_message(), Some(&serde_json::json!("hi")));
        assert!(message.as_error().is_none());

        let error = WorkerEvent::Error(ErrorEvent {
            kind: ErrorEventKind::OriginPolicyViolation,
            message: "SecurityError".to_string(),
            filename: "http://a.example/w.js".to_string(),
        });
        assert!(error.as_message().is_none());
        assert!(error.as_error().unwrap().is_policy_violation());
    }
}
