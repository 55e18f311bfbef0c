//! Execution origin mode resolution

use crate::options::{ExecutionOrigin, WorkerOptions};

/// Which origin a worker's same-origin checks are attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OriginMode {
    /// The origin of the worker URL (native `Worker` behavior)
    #[default]
    UrlOrigin,
    /// The origin of the script that constructed the worker
    InheritOrigin,
}

/// Maps construction options to an [`OriginMode`]
pub struct OriginModeResolver;

impl OriginModeResolver {
    /// Only an explicit `"from-calling-script"` selects [`OriginMode::InheritOrigin`].
    /// Absent options and unrecognized selectors keep the native behavior.
    pub fn resolve(options: Option<&WorkerOptions>) -> OriginMode {
        match options.map(|o| &o.execution_origin) {
            Some(ExecutionOrigin::FromCallingScript) => OriginMode::InheritOrigin,
            _ => OriginMode::UrlOrigin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_options_use_url_origin() {
        assert_eq!(OriginModeResolver::resolve(None), OriginMode::UrlOrigin);
        assert_eq!(
            OriginModeResolver::resolve(Some(&WorkerOptions::default())),
            OriginMode::UrlOrigin
        );
    }

    #[test]
    fn test_explicit_inherit() {
        let options = WorkerOptions::classic().inheriting_origin();
        assert_eq!(OriginModeResolver::resolve(Some(&options)), OriginMode::InheritOrigin);

        let options = WorkerOptions::module().with_execution_origin("from-calling-script");
        assert_eq!(OriginModeResolver::resolve(Some(&options)), OriginMode::InheritOrigin);
    }

    #[test]
    fn test_unrecognized_selector_falls_back() {
        for raw in ["inherit-origin", "url-origin", "FROM-CALLING-SCRIPT", ""] {
            let options = WorkerOptions::default().with_execution_origin(raw);
            assert_eq!(
                OriginModeResolver::resolve(Some(&options)),
                OriginMode::UrlOrigin,
                "selector {raw:?}"
            );
        }
    }
}
