//! Worker script locators

use std::fmt;
use url::Url;

use crate::error::{WorkerError, WorkerResult};

/// A worker script locator, either parsed or in textual form
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceReference {
    Url(Url),
    Text(String),
}

impl ResourceReference {
    /// Resolve against `base`, as the `Worker` constructor does with the
    /// calling script's URL
    pub fn resolve(&self, base: &Url) -> WorkerResult<Url> {
        match self {
            ResourceReference::Url(url) => Ok(url.clone()),
            ResourceReference::Text(text) => {
                base.join(text).map_err(|source| WorkerError::InvalidUrl {
                    input: text.clone(),
                    source,
                })
            }
        }
    }
}

impl fmt::Display for ResourceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceReference::Url(url) => f.write_str(url.as_str()),
            ResourceReference::Text(text) => f.write_str(text),
        }
    }
}

impl From<Url> for ResourceReference {
    fn from(url: Url) -> Self {
        ResourceReference::Url(url)
    }
}

impl From<&Url> for ResourceReference {
    fn from(url: &Url) -> Self {
        ResourceReference::Url(url.clone())
    }
}

impl From<String> for ResourceReference {
    fn from(text: String) -> Self {
        ResourceReference::Text(text)
    }
}

impl From<&str> for ResourceReference {
    fn from(text: &str) -> Self {
        ResourceReference::Text(text.to_string())
    }
}
