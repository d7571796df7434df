//! Authenticated client for the upstream document/list API.
//!
//! `UpstreamClient` attaches a broker-issued bearer credential to every
//! request and owns the retry rules: one forced refresh on a credential
//! rejection, `Retry-After`-aware backoff on 429, exponential backoff on 5xx
//! and transport errors. List endpoints are paged through
//! `@odata.nextLink` only until the caller's limit is met.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::{ApiError, SiteLocator};
use crate::auth::{Credential, CredentialResolver, SessionHandle};
use crate::retry::RetryPolicy;
use crate::utils::truncate_body;

// ============================================================================
// Constants
// ============================================================================

/// Largest `$top` the upstream accepts for a single page
pub const MAX_PAGE_SIZE: usize = 999;

const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Where a request goes: a path under the base URL, or a continuation link
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Path(String),
    Absolute(String),
}

/// One logical upstream request, replayable across retries.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    method: Method,
    target: Target,
    query: Vec<(String, String)>,
    headers: Vec<(&'static str, String)>,
    body: Option<Value>,
}

impl UpstreamRequest {
    fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            target: Target::Path(path.into()),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            body: Some(body),
            ..Self::new(Method::POST, path)
        }
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self {
            body: Some(body),
            ..Self::new(Method::PATCH, path)
        }
    }

    /// GET of a continuation link returned by a previous page
    fn follow(link: String) -> Self {
        Self {
            method: Method::GET,
            target: Target::Absolute(link),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query.push((name.to_string(), value.into()));
        self
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

/// Outcome of a single HTTP attempt, before retry decisions
enum Attempt {
    Done(Value),
    CredentialRejected,
    RateLimited(Option<Duration>),
    Unavailable(String),
    Failed(ApiError),
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    value: Vec<Value>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

/// Upstream API client.
/// Clone is cheap - the HTTP client and resolver are shared.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client,
    base_url: String,
    resolver: Arc<CredentialResolver>,
    retry: RetryPolicy,
    rate_limit: RetryPolicy,
}

impl UpstreamClient {
    pub fn new(
        base_url: &str,
        resolver: Arc<CredentialResolver>,
        timeout: Duration,
        retry: RetryPolicy,
        rate_limit: RetryPolicy,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::InvalidResponse(format!("failed to build client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            resolver,
            retry,
            rate_limit,
        })
    }

    pub fn resolver(&self) -> &Arc<CredentialResolver> {
        &self.resolver
    }

    fn url_for(&self, target: &Target) -> String {
        match target {
            Target::Path(path) => format!("{}{}", self.base_url, path),
            Target::Absolute(link) => link.clone(),
        }
    }

    /// Issue `request` for `session`, retrying as described in the module docs
    pub async fn call(&self, session: &SessionHandle, request: &UpstreamRequest) -> Result<Value, ApiError> {
        let mut credential = self.resolver.resolve(session).await?;
        let mut refreshed = false;
        let mut rate_limited = 0;
        let mut failures = 0;

        loop {
            match self.send_once(&credential, request).await {
                Attempt::Done(value) => return Ok(value),
                Attempt::CredentialRejected if !refreshed => {
                    warn!(session = %session.redacted(), "Credential rejected upstream, refreshing once");
                    refreshed = true;
                    credential = self.resolver.force_refresh(session).await?;
                }
                Attempt::CredentialRejected => {
                    warn!(session = %session.redacted(), "Refreshed credential rejected too");
                    return Err(ApiError::CredentialRejected);
                }
                Attempt::RateLimited(retry_after) => {
                    rate_limited += 1;
                    if !self.rate_limit.allows_another(rate_limited) {
                        return Err(ApiError::RateLimited);
                    }
                    let delay = retry_after
                        .map(|d| self.rate_limit.clamp(d))
                        .unwrap_or_else(|| self.rate_limit.backoff(rate_limited));
                    warn!(
                        retry = rate_limited,
                        backoff_ms = delay.as_millis() as u64,
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Attempt::Unavailable(detail) => {
                    failures += 1;
                    if !self.retry.allows_another(failures) {
                        return Err(ApiError::UpstreamUnavailable(detail));
                    }
                    let delay = self.retry.backoff(failures);
                    warn!(
                        retry = failures,
                        backoff_ms = delay.as_millis() as u64,
                        detail = %detail,
                        "Upstream unavailable, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Attempt::Failed(e) => return Err(e),
            }
        }
    }

    /// `call`, deserializing the response body into `T`
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        session: &SessionHandle,
        request: &UpstreamRequest,
    ) -> Result<T, ApiError> {
        let value = self.call(session, request).await?;
        serde_json::from_value(value)
            .map_err(|e| ApiError::InvalidResponse(format!("unexpected response shape: {}", e)))
    }

    /// Collect up to `limit` items from a list endpoint.
    ///
    /// Sends `$top` as a page-size hint, follows continuation links, and stops
    /// as soon as `limit` items are in hand (extra items on the last page are
    /// dropped, no further page is requested).
    pub async fn list(
        &self,
        session: &SessionHandle,
        request: UpstreamRequest,
        limit: usize,
    ) -> Result<Vec<Value>, ApiError> {
        let mut items = Vec::new();
        if limit == 0 {
            return Ok(items);
        }

        let mut next = Some(request.query("$top", limit.min(MAX_PAGE_SIZE).to_string()));
        let mut pages = 0;
        while let Some(page_request) = next.take() {
            let page: Page = serde_json::from_value(self.call(session, &page_request).await?)
                .map_err(|e| ApiError::InvalidResponse(format!("malformed list page: {}", e)))?;
            pages += 1;
            items.extend(page.value);

            if items.len() >= limit {
                items.truncate(limit);
                break;
            }
            if let Some(link) = page.next_link {
                self.check_same_origin(&link)?;
                let mut follow = UpstreamRequest::follow(link);
                follow.headers = page_request.headers.clone();
                next = Some(follow);
            }
        }

        debug!(pages, count = items.len(), "Collected list results");
        Ok(items)
    }

    /// Continuation links must point back at the API we authenticated to
    fn check_same_origin(&self, link: &str) -> Result<(), ApiError> {
        let same = match (Url::parse(link), Url::parse(&self.base_url)) {
            (Ok(link), Ok(base)) => link.origin() == base.origin(),
            _ => false,
        };
        if same {
            Ok(())
        } else {
            Err(ApiError::InvalidResponse(format!(
                "continuation link points outside the API: {}",
                link
            )))
        }
    }

    /// Canonical site id for `locator`. URL locators cost one lookup call;
    /// ids are returned as-is.
    pub async fn resolve_site_id(&self, session: &SessionHandle, locator: &SiteLocator) -> Result<String, ApiError> {
        match locator {
            SiteLocator::Id(id) => Ok(id.clone()),
            SiteLocator::Url(url) => {
                debug!(url = %url, "Resolving site URL to id");
                let site = self.call(session, &UpstreamRequest::get(locator.lookup_path())).await?;
                site.get("id")
                    .and_then(Value::as_str)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .ok_or_else(|| ApiError::InvalidResponse("site lookup returned no id".to_string()))
            }
        }
    }

    async fn send_once(&self, credential: &Credential, request: &UpstreamRequest) -> Attempt {
        let url = self.url_for(&request.target);
        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .bearer_auth(credential.secret())
            .header(header::ACCEPT, "application/json");
        for (name, value) in &request.headers {
            builder = builder.header(*name, value.as_str());
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return Attempt::Unavailable(format!("request to {} failed: {}", url, e)),
        };

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return Attempt::Unavailable(format!("failed to read response from {}: {}", url, e)),
        };
        debug!(method = %request.method, url = %url, status = status.as_u16(), "Upstream response");

        if status.is_success() {
            if status == StatusCode::NO_CONTENT || body.trim().is_empty() {
                return Attempt::Done(Value::Null);
            }
            return match serde_json::from_str(&body) {
                Ok(value) => Attempt::Done(value),
                Err(e) => Attempt::Failed(ApiError::InvalidResponse(format!(
                    "invalid JSON from {}: {} ({})",
                    url,
                    e,
                    truncate_body(&body, MAX_ERROR_BODY_LENGTH)
                ))),
            };
        }

        match status.as_u16() {
            401 => Attempt::CredentialRejected,
            429 => Attempt::RateLimited(retry_after),
            500..=599 => Attempt::Unavailable(format!(
                "status {}: {}",
                status,
                ApiError::detail_from_body(&body)
            )),
            _ => Attempt::Failed(ApiError::from_status(status, &body)),
        }
    }
}

/// Server-requested delay: delta-seconds or an HTTP date
fn parse_retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    let raw = headers.get(header::RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = chrono::DateTime::parse_from_rfc2822(raw).ok()?;
    let wait = at.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}

/// Percent-encode a caller-supplied value for use as one path segment.
/// Commas separate the parts of composite site ids and stay literal.
pub fn encode_segment(value: &str) -> String {
    value
        .split(',')
        .map(urlencoding::encode)
        .collect::<Vec<_>>()
        .join(",")
}
