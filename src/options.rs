//! Worker construction options
//!
//! Mirrors the options bag accepted by the `Worker` constructor plus the
//! `executionOrigin` selector. Options can be built directly or parsed from a
//! duck-typed JSON object, in which case unknown keys are ignored.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::{WorkerError, WorkerResult};

/// How the worker script (and everything it imports) is loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptType {
    /// Classic script: evaluated in the global scope, may call `importScripts()`
    #[default]
    Classic,
    /// ES module: may use `import`, `importScripts()` throws
    Module,
}

impl ScriptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptType::Classic => "classic",
            ScriptType::Module => "module",
        }
    }
}

impl fmt::Display for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credentials mode used for module script fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Credentials {
    Omit,
    #[default]
    SameOrigin,
    Include,
}

/// The raw `executionOrigin` selector as supplied by the caller
///
/// Parsing never fails. Anything other than the two canonical spellings is
/// kept as [`ExecutionOrigin::Unrecognized`] so the mode resolver can fall
/// back to the URL origin.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExecutionOrigin {
    /// `"from-url"`: the origin embedded in the worker URL (native behavior)
    #[default]
    FromUrl,
    /// `"from-calling-script"`: the origin of the script calling the constructor
    FromCallingScript,
    /// Any other value
    Unrecognized(String),
}

impl ExecutionOrigin {
    pub const FROM_URL: &'static str = "from-url";
    pub const FROM_CALLING_SCRIPT: &'static str = "from-calling-script";

    pub fn as_str(&self) -> &str {
        match self {
            ExecutionOrigin::FromUrl => Self::FROM_URL,
            ExecutionOrigin::FromCallingScript => Self::FROM_CALLING_SCRIPT,
            ExecutionOrigin::Unrecognized(raw) => raw,
        }
    }
}

impl From<&str> for ExecutionOrigin {
    fn from(value: &str) -> Self {
        match value {
            Self::FROM_URL => ExecutionOrigin::FromUrl,
            Self::FROM_CALLING_SCRIPT => ExecutionOrigin::FromCallingScript,
            other => ExecutionOrigin::Unrecognized(other.to_string()),
        }
    }
}

impl Serialize for ExecutionOrigin {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ExecutionOrigin {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(match value {
            serde_json::Value::String(s) => ExecutionOrigin::from(s.as_str()),
            serde_json::Value::Null => ExecutionOrigin::FromUrl,
            other => ExecutionOrigin::Unrecognized(other.to_string()),
        })
    }
}

/// Options accepted by [`Worker::new`](crate::Worker::new) and
/// [`ExecutionOriginWorker::new`](crate::ExecutionOriginWorker::new)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkerOptions {
    /// `"classic"` (default) or `"module"`
    #[serde(rename = "type")]
    pub script_type: ScriptType,
    /// `"omit"`, `"same-origin"` (default) or `"include"`
    pub credentials: Credentials,
    /// Which origin governs the worker's same-origin checks
    pub execution_origin: ExecutionOrigin,
    /// Exposed to the worker as `self.name`
    pub name: String,
}

impl WorkerOptions {
    pub fn classic() -> Self {
        Self::default()
    }

    pub fn module() -> Self {
        Self {
            script_type: ScriptType::Module,
            ..Default::default()
        }
    }

    pub fn with_execution_origin(mut self, origin: impl Into<ExecutionOrigin>) -> Self {
        self.execution_origin = origin.into();
        self
    }

    pub fn inheriting_origin(self) -> Self {
        self.with_execution_origin(ExecutionOrigin::FromCallingScript)
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// The options handed to the native worker: everything but the selector
    pub fn without_execution_origin(&self) -> Self {
        Self {
            execution_origin: ExecutionOrigin::default(),
            ..self.clone()
        }
    }

    /// Parse a JavaScript-style options object
    ///
    /// `null` is treated like an absent options argument.
    pub fn from_json(value: &serde_json::Value) -> WorkerResult<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        Self::deserialize(value).map_err(WorkerError::InvalidOptions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let options = WorkerOptions::default();
        assert_eq!(options.script_type, ScriptType::Classic);
        assert_eq!(options.credentials, Credentials::SameOrigin);
        assert_eq!(options.execution_origin, ExecutionOrigin::FromUrl);
        assert!(options.name.is_empty());
    }

    #[test]
    fn test_from_json_full() {
        let options = WorkerOptions::from_json(&json!({
            "type": "module",
            "credentials": "include",
            "executionOrigin": "from-calling-script",
            "name": "shim",
        }))
        .unwrap();

        assert_eq!(options.script_type, ScriptType::Module);
        assert_eq!(options.credentials, Credentials::Include);
        assert_eq!(options.execution_origin, ExecutionOrigin::FromCallingScript);
        assert_eq!(options.name, "shim");
    }

    #[test]
    fn test_from_json_ignores_unknown_keys() {
        let options = WorkerOptions::from_json(&json!({ "smol": true, "preload": [] })).unwrap();
        assert_eq!(options, WorkerOptions::default());

        let options = WorkerOptions::from_json(&serde_json::Value::Null).unwrap();
        assert_eq!(options, WorkerOptions::default());
    }

    #[test]
    fn test_execution_origin_is_lenient() {
        let options = WorkerOptions::from_json(&json!({ "executionOrigin": "inherit-origin" })).unwrap();
        assert_eq!(
            options.execution_origin,
            ExecutionOrigin::Unrecognized("inherit-origin".to_string())
        );

        let options = WorkerOptions::from_json(&json!({ "executionOrigin": 42 })).unwrap();
        assert_eq!(options.execution_origin, ExecutionOrigin::Unrecognized("42".to_string()));

        let options = WorkerOptions::from_json(&json!({ "executionOrigin": null })).unwrap();
        assert_eq!(options.execution_origin, ExecutionOrigin::FromUrl);
    }

    #[test]
    fn test_invalid_type_is_rejected() {
        let err = WorkerOptions::from_json(&json!({ "type": "wasm" })).unwrap_err();
        assert!(matches!(err, WorkerError::InvalidOptions(_)));

        let err = WorkerOptions::from_json(&json!({ "credentials": "always" })).unwrap_err();
        assert!(matches!(err, WorkerError::InvalidOptions(_)));
    }

    #[test]
    fn test_without_execution_origin_keeps_other_fields() {
        let options = WorkerOptions::module()
            .with_credentials(Credentials::Omit)
            .with_name("w")
            .inheriting_origin();
        let native = options.without_execution_origin();

        assert_eq!(native.script_type, ScriptType::Module);
        assert_eq!(native.credentials, Credentials::Omit);
        assert_eq!(native.name, "w");
        assert_eq!(native.execution_origin, ExecutionOrigin::FromUrl);
    }
}
