//! Worker global scope
//!
//! Installs `self`, `postMessage`, `onmessage`, `addEventListener`,
//! `importScripts`, `close`, `name` and `location` into a worker's context.
//! Native functions find their worker through a thread-local, since every
//! worker owns its thread and its `Context`.

use boa_engine::{
    Context, JsNativeError, JsResult, JsValue, NativeFunction, Source, js_string,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::trace;
use url::{Origin, Url};

use crate::fetch::{FetchRequest, RequestMode};
use crate::host::Host;
use crate::options::{Credentials, ScriptType, WorkerOptions};
use crate::runtime::worker::WorkerEvent;

/// Per-worker state reachable from native functions
pub(crate) struct WorkerScope {
    pub host: Host,
    /// The URL the worker was started from
    pub url: Url,
    /// The worker's own origin, which `'self'` and CORS checks are relative to
    pub origin: Origin,
    pub options: WorkerOptions,
    pub events: UnboundedSender<WorkerEvent>,
    closing: Cell<bool>,
}

impl WorkerScope {
    /// `origin` comes from [`Host::origin_of`], since a `blob:` or `file:`
    /// URL alone cannot tell it
    pub fn new(
        host: Host,
        url: Url,
        origin: Origin,
        options: WorkerOptions,
        events: UnboundedSender<WorkerEvent>,
    ) -> Self {
        Self {
            host,
            url,
            origin,
            options,
            events,
            closing: Cell::new(false),
        }
    }

    /// Whether the worker called `self.close()`
    pub fn is_closing(&self) -> bool {
        self.closing.get()
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Rc<WorkerScope>>> = const { RefCell::new(None) };
}

/// Bind `scope` to the current (worker) thread
pub(crate) fn enter(scope: Rc<WorkerScope>) {
    CURRENT.with(|current| *current.borrow_mut() = Some(scope));
}

/// Unbind the current thread's scope, releasing its event sender
pub(crate) fn leave() {
    CURRENT.with(|current| current.borrow_mut().take());
}

fn current() -> JsResult<Rc<WorkerScope>> {
    CURRENT
        .with(|current| current.borrow().clone())
        .ok_or_else(|| JsNativeError::typ().with_message("Not running inside a worker").into())
}

const WORKER_GLOBALS: &str = r#"
    (function(name, href) {
        const self = globalThis;
        globalThis.self = self;

        const listeners = new Map();

        self.name = name;
        self.location = Object.freeze({ href, toString() { return href; } });
        self.onmessage = null;
        self.onerror = null;

        self.postMessage = function(message) {
            if (arguments.length === 0) {
                throw new TypeError("postMessage requires at least 1 argument");
            }
            __exo_post_message(message);
        };

        self.importScripts = function(...urls) {
            __exo_import_scripts(...urls);
        };

        self.close = function() {
            __exo_close();
        };

        self.addEventListener = function(type, listener) {
            if (typeof listener !== "function") return;
            if (!listeners.has(type)) listeners.set(type, []);
            const list = listeners.get(type);
            if (!list.includes(listener)) list.push(listener);
        };

        self.removeEventListener = function(type, listener) {
            const list = listeners.get(type);
            if (!list) return;
            const index = list.indexOf(listener);
            if (index !== -1) list.splice(index, 1);
        };

        globalThis.__exo_dispatch_message = function(data) {
            const event = { type: "message", data, target: self, currentTarget: self };
            const handlers = [];
            if (typeof self.onmessage === "function") handlers.push(self.onmessage);
            handlers.push(...(listeners.get("message") || []));

            let failure = null;
            for (const handler of handlers) {
                try {
                    handler.call(self, event);
                } catch (e) {
                    if (failure === null) failure = e;
                }
            }
            if (failure !== null) throw failure;
        };
    })
"#;

/// Install the worker globals into `context`
pub(crate) fn register_worker_globals(context: &mut Context, scope: &WorkerScope) -> JsResult<()> {
    context.register_global_callable(
        js_string!("__exo_post_message"),
        1,
        NativeFunction::from_fn_ptr(post_message),
    )?;
    context.register_global_callable(
        js_string!("__exo_import_scripts"),
        0,
        NativeFunction::from_fn_ptr(import_scripts),
    )?;
    context.register_global_callable(js_string!("__exo_close"), 0, NativeFunction::from_fn_ptr(close))?;

    // Arguments are spliced in as JSON string literals
    let code = format!(
        "{}({}, {});",
        WORKER_GLOBALS,
        serde_json::Value::String(scope.options.name.clone()),
        serde_json::Value::String(scope.url.to_string()),
    );
    context.eval(Source::from_bytes(code.as_bytes()))?;

    Ok(())
}

/// Deliver a message from the parent to the worker's handlers
pub(crate) fn dispatch_message(context: &mut Context, data: &serde_json::Value) -> JsResult<()> {
    let data = JsValue::from_json(data, context)?;
    let dispatch = context
        .global_object()
        .get(js_string!("__exo_dispatch_message"), context)?
        .as_callable()
        .ok_or_else(|| JsNativeError::typ().with_message("Worker globals are not installed"))?;
    dispatch.call(&JsValue::undefined(), &[data], context)?;
    Ok(())
}

fn post_message(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let scope = current()?;
    let data = args.first().cloned().unwrap_or_else(JsValue::undefined);

    let message = if data.is_undefined() {
        serde_json::Value::Null
    } else {
        match data.to_json(context) {
            Ok(Some(value)) => value,
            Ok(None) => serde_json::Value::Null,
            Err(e) => {
                return Err(JsNativeError::typ()
                    .with_message(format!("DataCloneError: message could not be cloned: {e}"))
                    .into());
            }
        }
    };

    trace!(worker = %scope.url, "worker posted message");
    // The parent may already be gone; messages to nobody are dropped
    let _ = scope.events.send(WorkerEvent::Message(message));
    Ok(JsValue::undefined())
}

fn import_scripts(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let scope = current()?;
    if scope.options.script_type == ScriptType::Module {
        return Err(JsNativeError::typ()
            .with_message("Module scripts don't support importScripts()")
            .into());
    }

    let mut urls = Vec::with_capacity(args.len());
    for arg in args {
        let raw = arg.to_string(context)?.to_std_string_escaped();
        let url = scope.url.join(&raw).map_err(|e| {
            JsNativeError::syntax().with_message(format!(
                "Failed to execute 'importScripts': the URL '{raw}' is invalid: {e}"
            ))
        })?;
        urls.push(url);
    }

    // Fetch everything first, then run in order
    let mut scripts = Vec::with_capacity(urls.len());
    for url in urls {
        let request = FetchRequest {
            url,
            mode: RequestMode::NoCors,
            credentials: Credentials::Include,
            initiator: scope.origin.clone(),
        };
        let response = scope.host.fetch_import(&scope.origin, &request).map_err(|e| {
            JsNativeError::error().with_message(format!(
                "NetworkError: Failed to execute 'importScripts': {e}"
            ))
        })?;
        scripts.push(response);
    }

    for script in scripts {
        trace!(worker = %scope.url, script = %script.url, "evaluating imported script");
        context.eval(Source::from_bytes(script.body.as_bytes()))?;
    }

    Ok(JsValue::undefined())
}

fn close(_this: &JsValue, _args: &[JsValue], _context: &mut Context) -> JsResult<JsValue> {
    current()?.closing.set(true);
    Ok(JsValue::undefined())
}
