//! JavaScript execution for workers, powered by the Boa engine
//!
//! Every worker gets its own [`WorkerRuntime`]: an isolated Boa `Context`
//! with console, URL and encoding APIs from boa_runtime, the worker global
//! scope, and a module loader that fetches through the worker's host.

mod loader;
mod scope;
pub mod worker;

use boa_engine::{
    Context, JsError, JsResult, Source,
    builtins::promise::PromiseState,
    context::ContextBuilder,
    module::Module,
};
use boa_gc::{Finalize, Trace};
use boa_runtime::{
    ConsoleState, Logger,
    extensions::{ConsoleExtension, EncodingExtension, MicrotaskExtension, UrlExtension},
    register_extensions,
};
use std::path::Path;
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use loader::HostModuleLoader;
pub(crate) use scope::WorkerScope;

/// Upper bound on job-queue passes while waiting for a module to settle
const MODULE_SETTLE_PASSES: usize = 64;

/// Errors raised while running worker code
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Failed to create worker context: {0}")]
    Setup(String),

    #[error("{0}")]
    Script(String),

    #[error("{0}")]
    Module(String),
}

/// Result type for worker runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Routes worker `console.*` output into `tracing`
#[derive(Debug, Clone, Default, Trace, Finalize)]
pub struct WorkerConsole;

impl Logger for WorkerConsole {
    fn log(&self, msg: String, _state: &ConsoleState, _context: &mut Context) -> JsResult<()> {
        info!(target: "execution_origin::console", "{}", msg);
        Ok(())
    }

    fn info(&self, msg: String, _state: &ConsoleState, _context: &mut Context) -> JsResult<()> {
        info!(target: "execution_origin::console", "{}", msg);
        Ok(())
    }

    fn warn(&self, msg: String, _state: &ConsoleState, _context: &mut Context) -> JsResult<()> {
        warn!(target: "execution_origin::console", "{}", msg);
        Ok(())
    }

    fn error(&self, msg: String, _state: &ConsoleState, _context: &mut Context) -> JsResult<()> {
        error!(target: "execution_origin::console", "{}", msg);
        Ok(())
    }
}

/// An isolated JavaScript context running one worker
pub(crate) struct WorkerRuntime {
    context: Context,
    scope: Rc<WorkerScope>,
    loader: Rc<HostModuleLoader>,
}

impl WorkerRuntime {
    /// Build the context and install the worker scope on the current thread
    pub fn new(scope: WorkerScope) -> RuntimeResult<Self> {
        let scope = Rc::new(scope);
        let loader = Rc::new(HostModuleLoader::new(Rc::clone(&scope)));

        let mut context = ContextBuilder::default()
            .module_loader(Rc::clone(&loader))
            .build()
            .map_err(|e| RuntimeError::Setup(e.to_string()))?;

        register_extensions(
            (
                ConsoleExtension(WorkerConsole),
                UrlExtension,
                EncodingExtension,
                MicrotaskExtension,
            ),
            None,
            &mut context,
        )
        .map_err(|e| RuntimeError::Setup(e.to_string()))?;

        scope::register_worker_globals(&mut context, &scope)
            .map_err(|e| RuntimeError::Setup(e.to_string()))?;
        scope::enter(Rc::clone(&scope));

        Ok(Self {
            context,
            scope,
            loader,
        })
    }

    pub fn scope(&self) -> &WorkerScope {
        &self.scope
    }

    /// Run `source` as a classic script in the global scope
    pub fn evaluate_classic(&mut self, source: &str, url: &Url) -> RuntimeResult<()> {
        let source = Source::from_bytes(source.as_bytes()).with_path(Path::new(url.as_str()));
        let result = self.context.eval(source).map(|_| ());
        // An exception from the script itself wins over one from its jobs
        let result = result.and(self.context.run_jobs());

        result.map_err(|e| RuntimeError::Script(self.describe(&e)))
    }

    /// Parse, link and evaluate `source` as the entry module of the worker
    pub fn evaluate_module(&mut self, source: &str, url: &Url) -> RuntimeResult<()> {
        let parsed = {
            let source = Source::from_bytes(source.as_bytes()).with_path(Path::new(url.as_str()));
            Module::parse(source, None, &mut self.context)
        };
        let module = parsed.map_err(|e| RuntimeError::Module(self.describe(&e)))?;
        self.loader.register(url.clone(), module.clone());

        let promise = module.load_link_evaluate(&mut self.context);

        for _ in 0..MODULE_SETTLE_PASSES {
            self.context
                .run_jobs()
                .map_err(|e| RuntimeError::Module(self.describe(&e)))?;

            match promise.state() {
                PromiseState::Fulfilled(_) => return Ok(()),
                PromiseState::Rejected(reason) => {
                    let err = JsError::from_opaque(reason.clone());
                    return Err(RuntimeError::Module(self.describe(&err)));
                }
                PromiseState::Pending => continue,
            }
        }

        // Top-level await on something that never settles; the worker stays up
        debug!(worker = %self.scope.url, "entry module still pending after evaluation");
        Ok(())
    }

    /// Hand a message from the parent to the worker's handlers
    pub fn dispatch_message(&mut self, data: &serde_json::Value) -> RuntimeResult<()> {
        let result = scope::dispatch_message(&mut self.context, data);
        let result = result.and(self.context.run_jobs());

        result.map_err(|e| RuntimeError::Script(self.describe(&e)))
    }

    /// A readable message for a thrown value
    fn describe(&mut self, err: &JsError) -> String {
        match err.try_native(&mut self.context) {
            Ok(native) => native.to_string(),
            Err(_) => err.to_string(),
        }
    }
}

impl Drop for WorkerRuntime {
    fn drop(&mut self) {
        scope::leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::StaticFetcher;
    use crate::host::{Host, HostConfig};
    use crate::options::WorkerOptions;
    use crate::runtime::worker::WorkerEvent;
    use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

    const CALLER: &str = "http://localhost:8080/index.js";
    const CROSS: &str = "http://cross-origin.localhost:8080/";

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn runtime(fetcher: StaticFetcher, options: WorkerOptions) -> (WorkerRuntime, UnboundedReceiver<WorkerEvent>) {
        let host = Host::new(HostConfig::with_script_url(url(CALLER)), fetcher);
        let (tx, rx) = unbounded_channel();
        let worker_url = url("http://localhost:8080/worker.js");
        let origin = worker_url.origin();
        let scope = WorkerScope::new(host, worker_url, origin, options, tx);
        (WorkerRuntime::new(scope).unwrap(), rx)
    }

    fn next_message(rx: &mut UnboundedReceiver<WorkerEvent>) -> serde_json::Value {
        match rx.try_recv() {
            Ok(WorkerEvent::Message(data)) => data,
            other => panic!("expected a message, got {other:?}"),
        }
    }

    #[test]
    fn test_classic_script_posts_message() {
        let (mut rt, mut rx) = runtime(StaticFetcher::new(), WorkerOptions::classic().with_name("w1"));
        rt.evaluate_classic(
            "self.postMessage({ name: self.name, href: location.href, n: String(1 + 1) });",
            &url("http://localhost:8080/worker.js"),
        )
        .unwrap();

        assert_eq!(
            next_message(&mut rx),
            serde_json::json!({ "name": "w1", "href": "http://localhost:8080/worker.js", "n": "2" })
        );
    }

    #[test]
    fn test_dispatch_reaches_onmessage_and_listeners() {
        let (mut rt, mut rx) = runtime(StaticFetcher::new(), WorkerOptions::classic());
        rt.evaluate_classic(
            r#"
            self.onmessage = (e) => postMessage("on:" + e.data);
            self.addEventListener("message", (e) => postMessage("listener:" + e.data));
            "#,
            &url("http://localhost:8080/worker.js"),
        )
        .unwrap();

        rt.dispatch_message(&serde_json::json!("ping")).unwrap();
        assert_eq!(next_message(&mut rx), "on:ping");
        assert_eq!(next_message(&mut rx), "listener:ping");
    }

    #[test]
    fn test_dispatch_keeps_proto_key_as_data() {
        let (mut rt, mut rx) = runtime(StaticFetcher::new(), WorkerOptions::classic());
        rt.evaluate_classic(
            r#"self.onmessage = (e) => postMessage(Object.keys(e.data).join(",") + ":" + e.data.a);"#,
            &url("http://localhost:8080/worker.js"),
        )
        .unwrap();

        rt.dispatch_message(&serde_json::json!({ "__proto__": { "x": "y" }, "a": "b" }))
            .unwrap();
        assert_eq!(next_message(&mut rx), "__proto__,a:b");
    }

    #[test]
    fn test_job_errors_are_reported() {
        let (mut rt, _rx) = runtime(StaticFetcher::new(), WorkerOptions::classic());
        let err = rt
            .evaluate_classic(
                "queueMicrotask(() => { throw new Error('late failure'); });",
                &url("http://localhost:8080/worker.js"),
            )
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Script(ref msg) if msg.contains("late failure")));

        rt.evaluate_classic(
            "self.onmessage = () => queueMicrotask(() => { throw new Error('handler job'); });",
            &url("http://localhost:8080/worker.js"),
        )
        .unwrap();
        let err = rt.dispatch_message(&serde_json::Value::Null).unwrap_err();
        assert!(matches!(err, RuntimeError::Script(ref msg) if msg.contains("handler job")));
    }

    #[test]
    fn test_handler_exception_is_reported() {
        let (mut rt, _rx) = runtime(StaticFetcher::new(), WorkerOptions::classic());
        rt.evaluate_classic(
            "self.onmessage = () => { throw new RangeError('boom'); };",
            &url("http://localhost:8080/worker.js"),
        )
        .unwrap();

        let err = rt.dispatch_message(&serde_json::Value::Null).unwrap_err();
        assert!(matches!(err, RuntimeError::Script(ref msg) if msg.contains("boom")));
    }

    #[test]
    fn test_import_scripts_runs_in_order() {
        let fetcher = StaticFetcher::new()
            .with_script(url(&format!("{CROSS}a.js")), "globalThis.order = ['a'];")
            .with_script(url(&format!("{CROSS}b.js")), "order.push('b');");
        let (mut rt, mut rx) = runtime(fetcher, WorkerOptions::classic());

        rt.evaluate_classic(
            &format!("importScripts('{CROSS}a.js', '{CROSS}b.js'); postMessage(order.join(','));"),
            &url("http://localhost:8080/worker.js"),
        )
        .unwrap();
        assert_eq!(next_message(&mut rx), "a,b");
    }

    #[test]
    fn test_import_scripts_missing_script_throws() {
        let (mut rt, _rx) = runtime(StaticFetcher::new(), WorkerOptions::classic());
        let err = rt
            .evaluate_classic(
                &format!("importScripts('{CROSS}missing.js');"),
                &url("http://localhost:8080/worker.js"),
            )
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Script(ref msg) if msg.contains("NetworkError")));
    }

    #[test]
    fn test_import_scripts_unavailable_in_modules() {
        let (mut rt, _rx) = runtime(StaticFetcher::new(), WorkerOptions::module());
        let err = rt
            .evaluate_module("importScripts();", &url("http://localhost:8080/worker.js"))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Module(ref msg) if msg.contains("importScripts")));
    }

    #[test]
    fn test_module_imports_cross_origin_with_cors() {
        let fetcher = StaticFetcher::new()
            .with_public_script(url(&format!("{CROSS}dep.js")), "export const value = 42;")
            .with_script(url(&format!("{CROSS}private.js")), "export const value = 0;");
        let (mut rt, mut rx) = runtime(fetcher, WorkerOptions::module());

        rt.evaluate_module(
            &format!("import {{ value }} from '{CROSS}dep.js'; postMessage(`value=${{value}}`);"),
            &url("http://localhost:8080/worker.js"),
        )
        .unwrap();
        assert_eq!(next_message(&mut rx), "value=42");

        let err = rt
            .evaluate_module(
                &format!("import '{CROSS}private.js';"),
                &url("http://localhost:8080/other.js"),
            )
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Module(ref msg) if msg.contains("Access-Control-Allow-Origin")));
    }

    #[test]
    fn test_classic_syntax_error() {
        let (mut rt, _rx) = runtime(StaticFetcher::new(), WorkerOptions::classic());
        let err = rt
            .evaluate_classic("export {};", &url("http://localhost:8080/worker.js"))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Script(_)));
    }

    #[test]
    fn test_close_sets_flag() {
        let (mut rt, _rx) = runtime(StaticFetcher::new(), WorkerOptions::classic());
        assert!(!rt.scope().is_closing());
        rt.evaluate_classic("self.close();", &url("http://localhost:8080/worker.js"))
            .unwrap();
        assert!(rt.scope().is_closing());
    }
}
