//! Guarded outbound HTTP client
//!
//! Fetches caller-supplied URLs only after the SSRF guard approves them.
//!
//! # Security
//!
//! - The connection is pinned to the addresses the guard checked, so a
//!   second DNS answer cannot redirect it (no check/use race)
//! - Automatic redirects are disabled; each `Location` hop goes back
//!   through the guard before it is followed
//! - System proxies are ignored, since a proxy would make the pin moot
//! - Every denial surfaces as the same `Error::UrlDenied`

use std::time::Duration;

use reqwest::{
    Client, Response,
    header::{CONTENT_TYPE, HeaderMap, LOCATION},
    redirect::Policy,
};
use serde::Serialize;
use tracing::debug;
use url::{Host, Url};

use crate::config::SsrfConfig;
use crate::security::{ApprovedTarget, SsrfGuard};
use crate::{Error, Result};

/// Result of a guarded fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchedResponse {
    /// Final URL after redirects
    pub url: String,
    /// HTTP status code
    pub status: u16,
    /// `Content-Type` header, if any
    pub content_type: Option<String>,
    /// Body decoded lossily as UTF-8, capped at the configured size
    pub body: String,
    /// Whether the body was cut at the size cap
    pub truncated: bool,
}

/// HTTP client that consults the SSRF guard before every request
#[derive(Debug, Clone)]
pub struct GuardedClient {
    guard: SsrfGuard,
    timeout: Duration,
    max_redirects: usize,
    max_response_bytes: usize,
}

impl GuardedClient {
    /// Create a client from the SSRF configuration
    #[must_use]
    pub fn new(guard: SsrfGuard, config: &SsrfConfig) -> Self {
        Self {
            guard,
            timeout: config.fetch_timeout,
            max_redirects: config.max_redirects,
            max_response_bytes: config.max_response_bytes,
        }
    }

    /// The guard consulted before each request
    #[must_use]
    pub fn guard(&self) -> &SsrfGuard {
        &self.guard
    }

    /// GET `candidate`, following redirects that pass the guard.
    ///
    /// # Errors
    ///
    /// Returns `Error::UrlDenied` if the URL or any redirect target is
    /// denied, `Error::Fetch` on too many redirects, `Error::Http` if the
    /// request itself fails.
    pub async fn get(&self, candidate: &str) -> Result<FetchedResponse> {
        let mut target = self
            .guard
            .check(candidate)
            .await
            .map_err(|_| Error::UrlDenied)?;
        let mut redirects = 0;

        loop {
            let response = self.send(&target).await?;

            let next = if response.status().is_redirection() {
                redirect_location(&target.url, response.headers())
            } else {
                None
            };
            let Some(next) = next else {
                return self.read(target.url, response).await;
            };

            if redirects == self.max_redirects {
                return Err(Error::Fetch(format!(
                    "Exceeded {} redirects",
                    self.max_redirects
                )));
            }
            redirects += 1;
            debug!(hop = redirects, "Following redirect");

            target = self
                .guard
                .check_url(next)
                .await
                .map_err(|_| Error::UrlDenied)?;
        }
    }

    async fn send(&self, target: &ApprovedTarget) -> Result<Response> {
        let mut builder = Client::builder()
            .redirect(Policy::none())
            .no_proxy()
            .timeout(self.timeout);

        if let Some(Host::Domain(domain)) = target.url.host() {
            builder = builder.resolve_to_addrs(domain, &target.addrs);
        }

        let client = builder.build()?;
        Ok(client.get(target.url.clone()).send().await?)
    }

    async fn read(&self, url: Url, mut response: Response) -> Result<FetchedResponse> {
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let mut body = Vec::new();
        let mut truncated = false;
        while let Some(chunk) = response.chunk().await? {
            let room = self.max_response_bytes - body.len();
            if chunk.len() > room {
                body.extend_from_slice(&chunk[..room]);
                truncated = true;
                break;
            }
            body.extend_from_slice(&chunk);
        }

        debug!(status, bytes = body.len(), truncated, "Fetched");

        Ok(FetchedResponse {
            url: url.to_string(),
            status,
            content_type,
            body: String::from_utf8_lossy(&body).into_owned(),
            truncated,
        })
    }
}

/// Resolve a `Location` header against the current URL
fn redirect_location(base: &Url, headers: &HeaderMap) -> Option<Url> {
    let location = headers.get(LOCATION)?.to_str().ok()?;
    base.join(location).ok()
}
