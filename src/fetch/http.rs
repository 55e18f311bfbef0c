//! HTTP(S) fetching with blocking reqwest

use reqwest::blocking::Client;
use std::sync::{Arc, OnceLock};
use reqwest::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE, HeaderMap, ORIGIN,
};
use url::Url;

use super::{FetchRequest, FetchResponse, RequestMode, ResourceFetcher};
use crate::error::FetchError;

/// Fetches `http:` and `https:` scripts
///
/// The blocking client is only built on the first fetch, which happens on a
/// worker thread. Building it on an async runtime thread would panic.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: Arc<OnceLock<Client>>,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client: Arc::new(OnceLock::from(client)),
        }
    }

    fn client(&self) -> &Client {
        self.client.get_or_init(Client::new)
    }
}

fn header(headers: &HeaderMap, name: impl reqwest::header::AsHeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
}

impl ResourceFetcher for HttpFetcher {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let url = &request.url;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FetchError::UnsupportedScheme(url.scheme().to_string()));
        }

        let mut builder = self.client().get(url.as_str());
        if request.mode == RequestMode::Cors {
            builder = builder.header(ORIGIN, request.initiator.ascii_serialization());
        }

        let response = builder.send().map_err(|e| FetchError::Network {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.clone(),
                status: status.as_u16(),
            });
        }

        let final_url = Url::parse(response.url().as_str()).unwrap_or_else(|_| url.clone());
        let headers = response.headers().clone();
        let body = response.text().map_err(|e| FetchError::Network {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        Ok(FetchResponse {
            url: final_url,
            body,
            content_type: header(&headers, CONTENT_TYPE),
            allow_origin: header(&headers, ACCESS_CONTROL_ALLOW_ORIGIN),
            allow_credentials: header(&headers, ACCESS_CONTROL_ALLOW_CREDENTIALS).as_deref()
                == Some("true"),
        })
    }
}
