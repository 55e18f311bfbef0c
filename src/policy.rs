//! Origin-based load policy
//!
//! Two layers decide whether a worker may start from a URL:
//! - the worker same-origin rule: the script URL must share the calling
//!   script's origin (`data:` URLs are exempt)
//! - an optional Content-Security-Policy, consulted through `worker-src`
//!   (falling back to `child-src`, `script-src`, `default-src`)
//!
//! Scripts pulled in by a running worker (`importScripts()`, `import`) are
//! checked against `script-src` (falling back to `default-src`).

use std::collections::HashMap;
use url::{Origin, Url};

use crate::error::PolicyViolation;

const WORKER_FALLBACK: &[&str] = &["worker-src", "child-src", "script-src", "default-src"];
const SCRIPT_FALLBACK: &[&str] = &["script-src", "default-src"];

/// A single CSP source expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceExpression {
    /// `'self'`
    SelfOrigin,
    /// `*`
    Wildcard,
    /// `blob:`, `https:`, ...
    Scheme(String),
    /// `https://*.example.com:8443`, `example.com`, ...
    Host {
        scheme: Option<String>,
        host: String,
        port: Option<u16>,
    },
}

impl SourceExpression {
    fn parse(token: &str) -> Option<Self> {
        let lower = token.to_ascii_lowercase();
        match lower.as_str() {
            "'self'" => return Some(SourceExpression::SelfOrigin),
            "*" => return Some(SourceExpression::Wildcard),
            // Other keywords, nonces and hashes never match a URL
            t if t.starts_with('\'') => return None,
            _ => {}
        }

        if let Some(scheme) = lower.strip_suffix(':') {
            if !scheme.is_empty() && !scheme.contains('/') {
                return Some(SourceExpression::Scheme(scheme.to_string()));
            }
        }

        let (scheme, rest) = match lower.split_once("://") {
            Some((scheme, rest)) => (Some(scheme.to_string()), rest),
            None => (None, lower.as_str()),
        };
        let authority = rest.split('/').next().unwrap_or(rest);
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, "*")) => (host, None),
            Some((host, port)) => (host, Some(port.parse().ok()?)),
            None => (authority, None),
        };
        if host.is_empty() {
            return None;
        }

        Some(SourceExpression::Host {
            scheme,
            host: host.to_string(),
            port,
        })
    }

    fn matches(&self, url: &Url, owner: &Origin) -> bool {
        match self {
            // Local schemes such as blob: only match when listed explicitly
            SourceExpression::SelfOrigin => {
                matches!(url.scheme(), "http" | "https" | "ws" | "wss") && &url.origin() == owner
            }
            SourceExpression::Wildcard => matches!(url.scheme(), "http" | "https" | "ws" | "wss"),
            SourceExpression::Scheme(scheme) => {
                url.scheme() == scheme || (scheme == "http" && url.scheme() == "https")
            }
            SourceExpression::Host { scheme, host, port } => {
                if let Some(scheme) = scheme {
                    let upgrade = scheme == "http" && url.scheme() == "https";
                    if url.scheme() != scheme && !upgrade {
                        return false;
                    }
                } else if !matches!(url.scheme(), "http" | "https") {
                    return false;
                }

                let Some(url_host) = url.host_str() else {
                    return false;
                };
                let host_matches = match host.strip_prefix("*.") {
                    Some(suffix) => url_host.ends_with(&format!(".{suffix}")),
                    None => url_host.eq_ignore_ascii_case(host),
                };
                if !host_matches {
                    return false;
                }

                match port {
                    Some(port) => url.port_or_known_default() == Some(*port),
                    // Without an explicit port only the scheme default matches
                    None => url.port().is_none(),
                }
            }
        }
    }
}

/// A parsed Content-Security-Policy header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentSecurityPolicy {
    directives: HashMap<String, Vec<SourceExpression>>,
}

impl ContentSecurityPolicy {
    /// Parse `;`-separated directives; the first occurrence of a directive wins
    pub fn parse(header: &str) -> Self {
        let mut directives = HashMap::new();
        for directive in header.split(';') {
            let mut tokens = directive.split_ascii_whitespace();
            let Some(name) = tokens.next() else {
                continue;
            };
            let name = name.to_ascii_lowercase();
            if directives.contains_key(&name) {
                continue;
            }
            let sources = tokens.filter_map(SourceExpression::parse).collect();
            directives.insert(name, sources);
        }
        Self { directives }
    }

    pub fn directive(&self, name: &str) -> Option<&[SourceExpression]> {
        self.directives.get(name).map(Vec::as_slice)
    }

    /// Returns the name of the directive that blocked `url`, if any
    fn blocked_by(&self, fallback: &[&str], url: &Url, owner: &Origin) -> Option<String> {
        let name = fallback.iter().find(|name| self.directives.contains_key(**name))?;
        let sources = &self.directives[*name];
        if sources.iter().any(|source| source.matches(url, owner)) {
            None
        } else {
            Some(name.to_string())
        }
    }
}

/// The security policy of a calling script
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityPolicy {
    csp: Option<ContentSecurityPolicy>,
}

impl SecurityPolicy {
    /// Same-origin rule only
    pub fn new() -> Self {
        Self::default()
    }

    /// Same-origin rule plus a Content-Security-Policy header
    pub fn with_csp(header: &str) -> Self {
        Self {
            csp: Some(ContentSecurityPolicy::parse(header)),
        }
    }

    pub fn csp(&self) -> Option<&ContentSecurityPolicy> {
        self.csp.as_ref()
    }

    /// May a script owned by `owner` start a worker from `url`?
    pub fn check_worker(&self, owner: &Origin, url: &Url) -> Result<(), PolicyViolation> {
        self.check_worker_with_origin(owner, url, &url.origin())
    }

    /// Like [`SecurityPolicy::check_worker`], with the origin of `url`
    /// already resolved (a `blob:` URL belongs to its creator)
    pub fn check_worker_with_origin(
        &self,
        owner: &Origin,
        url: &Url,
        url_origin: &Origin,
    ) -> Result<(), PolicyViolation> {
        if url.scheme() != "data" && url_origin != owner {
            return Err(PolicyViolation {
                url: url.clone(),
                directive: "same-origin".to_string(),
                reason: format!(
                    "script origin {} does not match the calling script's origin {}",
                    url_origin.ascii_serialization(),
                    owner.ascii_serialization()
                ),
            });
        }
        self.check_csp(WORKER_FALLBACK, owner, url)
    }

    /// May a worker owned by `owner` pull in the script at `url`?
    pub fn check_script(&self, owner: &Origin, url: &Url) -> Result<(), PolicyViolation> {
        self.check_csp(SCRIPT_FALLBACK, owner, url)
    }

    fn check_csp(&self, fallback: &[&str], owner: &Origin, url: &Url) -> Result<(), PolicyViolation> {
        let Some(csp) = &self.csp else {
            return Ok(());
        };
        match csp.blocked_by(fallback, url, owner) {
            None => Ok(()),
            Some(directive) => Err(PolicyViolation {
                url: url.clone(),
                reason: format!("not allowed by Content-Security-Policy directive '{directive}'"),
                directive,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn caller() -> Origin {
        url("http://localhost:8080/index.js").origin()
    }

    fn blob_url() -> Url {
        url("blob:http://localhost:8080/6a1c8f7e-0000-4000-8000-000000000000")
    }

    #[test]
    fn test_same_origin_rule() {
        let policy = SecurityPolicy::new();
        assert!(policy.check_worker(&caller(), &url("http://localhost:8080/w.js")).is_ok());
        assert!(policy.check_worker(&caller(), &blob_url()).is_ok());
        assert!(policy.check_worker(&caller(), &url("data:text/javascript,1")).is_ok());

        let violation = policy
            .check_worker(&caller(), &url("http://cross-origin.localhost:8080/w.js"))
            .unwrap_err();
        assert_eq!(violation.directive, "same-origin");
    }

    #[test]
    fn test_opaque_owner_compares_by_value() {
        let policy = SecurityPolicy::new();
        let owner = url("file:///tmp/index.js").origin();
        let worker = url("file:///tmp/w.js");

        // Every opaque origin is distinct unless it is the same value
        assert!(policy.check_worker(&owner, &worker).is_err());
        assert!(policy.check_worker_with_origin(&owner, &worker, &owner).is_ok());
        assert!(
            policy
                .check_worker_with_origin(&owner, &worker, &worker.origin())
                .is_err()
        );
    }

    #[test]
    fn test_foreign_blob_is_cross_origin() {
        let policy = SecurityPolicy::new();
        let foreign = url("blob:https://evil.example/6a1c8f7e-0000-4000-8000-000000000000");
        assert!(policy.check_worker(&caller(), &foreign).is_err());
    }

    #[test]
    fn test_worker_src_without_blob_blocks_shims() {
        let policy = SecurityPolicy::with_csp("worker-src 'self'");
        assert!(policy.check_worker(&caller(), &url("http://localhost:8080/w.js")).is_ok());

        let violation = policy.check_worker(&caller(), &blob_url()).unwrap_err();
        assert_eq!(violation.directive, "worker-src");

        let policy = SecurityPolicy::with_csp("worker-src 'self' blob:");
        assert!(policy.check_worker(&caller(), &blob_url()).is_ok());
    }

    #[test]
    fn test_worker_fallback_chain() {
        let policy = SecurityPolicy::with_csp("default-src 'none'; script-src 'self' blob:");
        assert!(policy.check_worker(&caller(), &blob_url()).is_ok());

        let policy = SecurityPolicy::with_csp("default-src 'none'");
        let violation = policy.check_worker(&caller(), &blob_url()).unwrap_err();
        assert_eq!(violation.directive, "default-src");
    }

    #[test]
    fn test_script_src_host_sources() {
        let policy = SecurityPolicy::with_csp(
            "script-src 'self' http://cross-origin.localhost:8080 https://*.cdn.example",
        );
        let owner = caller();

        assert!(policy.check_script(&owner, &url("http://cross-origin.localhost:8080/w.js")).is_ok());
        assert!(policy.check_script(&owner, &url("https://a.cdn.example/w.js")).is_ok());
        assert!(policy.check_script(&owner, &url("https://cdn.example/w.js")).is_err());
        assert!(policy.check_script(&owner, &url("http://cross-origin.localhost:9090/w.js")).is_err());
        assert!(policy.check_script(&owner, &url("http://other.localhost:8080/w.js")).is_err());
    }

    #[test]
    fn test_wildcard_excludes_local_schemes() {
        let policy = SecurityPolicy::with_csp("script-src *");
        assert!(policy.check_script(&caller(), &url("https://anything.example/x.js")).is_ok());
        assert!(policy.check_script(&caller(), &blob_url()).is_err());
    }

    #[test]
    fn test_no_applicable_directive_allows() {
        let policy = SecurityPolicy::with_csp("img-src 'none'");
        assert!(policy.check_script(&caller(), &url("https://x.example/a.js")).is_ok());
        assert!(policy.check_worker(&caller(), &blob_url()).is_ok());
    }

    #[test]
    fn test_parse_keeps_first_directive() {
        let csp = ContentSecurityPolicy::parse("script-src 'self'; script-src *; ; worker-src blob: 'unsafe-eval'");
        assert_eq!(csp.directive("script-src"), Some(&[SourceExpression::SelfOrigin][..]));
        assert_eq!(
            csp.directive("worker-src"),
            Some(&[SourceExpression::Scheme("blob".to_string())][..])
        );
        assert_eq!(csp.directive("img-src"), None);
    }
}
