//! Module loading for module workers
//!
//! Specifiers resolve against the importing module's URL. Module sources are
//! tagged with their URL as their path so the referrer can be recovered when
//! they import further modules.

use boa_engine::{
    Context, JsNativeError, JsResult, JsString, Source,
    module::{Module, ModuleLoader, Referrer},
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;
use tracing::trace;
use url::Url;

use crate::fetch::{FetchRequest, RequestMode};
use crate::runtime::scope::WorkerScope;

/// Fetches imported modules through the worker's host
pub(crate) struct HostModuleLoader {
    scope: Rc<WorkerScope>,
    modules: RefCell<HashMap<Url, Module>>,
}

impl HostModuleLoader {
    pub fn new(scope: Rc<WorkerScope>) -> Self {
        Self {
            scope,
            modules: RefCell::new(HashMap::new()),
        }
    }

    /// Record a module parsed outside the loader (the worker's entry module)
    pub fn register(&self, url: Url, module: Module) {
        self.modules.borrow_mut().insert(url, module);
    }

    fn referrer_url(&self, referrer: &Referrer) -> Url {
        referrer
            .path()
            .and_then(Path::to_str)
            .and_then(|path| Url::parse(path).ok())
            .unwrap_or_else(|| self.scope.url.clone())
    }
}

impl ModuleLoader for HostModuleLoader {
    fn load_imported_module(
        self: Rc<Self>,
        referrer: Referrer,
        specifier: JsString,
        context: &RefCell<&mut Context>,
    ) -> impl std::future::Future<Output = JsResult<Module>> {
        let specifier = specifier.to_std_string_escaped();

        async move {
            let base = self.referrer_url(&referrer);
            let url = base.join(&specifier).map_err(|e| {
                JsNativeError::typ().with_message(format!(
                    "Failed to resolve module specifier '{specifier}' against '{base}': {e}"
                ))
            })?;

            if let Some(module) = self.modules.borrow().get(&url) {
                return Ok(module.clone());
            }

            let scope = &self.scope;
            let request = FetchRequest {
                url: url.clone(),
                mode: RequestMode::Cors,
                credentials: scope.options.credentials,
                initiator: scope.origin.clone(),
            };
            let response = scope.host.fetch_import(&scope.origin, &request).map_err(|e| {
                JsNativeError::typ()
                    .with_message(format!("Failed to fetch module '{specifier}': {e}"))
            })?;
            trace!(worker = %scope.url, module = %response.url, "loaded module");

            let module = {
                let mut ctx = context.borrow_mut();
                let source = Source::from_bytes(response.body.as_bytes())
                    .with_path(Path::new(response.url.as_str()));
                Module::parse(source, None, &mut *ctx)?
            };
            self.modules.borrow_mut().insert(url, module.clone());
            Ok(module)
        }
    }
}
