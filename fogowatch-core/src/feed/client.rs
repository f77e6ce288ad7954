//! HTTP client for the incident API
//!
//! Tries the primary endpoint and then each fallback in order, with a short
//! linear back-off between attempts. The primary endpoint is fetched with
//! conditional headers; a `304 Not Modified` reuses the last parsed records.

use std::time::Duration;

use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION, CACHE_CONTROL,
    ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, ORIGIN, REFERER, USER_AGENT,
};
use reqwest::StatusCode;

use crate::config::FeedConfig;
use crate::error::{Error, Result};
use crate::format::truncate;
use crate::types::IncidentRecord;

use super::parse::parse_document;
use super::IncidentFeed;

/// Back-off step between endpoint attempts; attempt `n` waits `n + 1` steps.
const BACKOFF_STEP: Duration = Duration::from_millis(200);

/// Validators and records from the last successful primary fetch.
#[derive(Debug, Default)]
struct ConditionalCache {
    etag: Option<String>,
    last_modified: Option<String>,
    records: Option<Vec<IncidentRecord>>,
}

/// Async HTTP client for the incident API
pub struct FeedClient {
    http_client: reqwest::Client,
    endpoints: Vec<String>,
    cache: ConditionalCache,
}

impl FeedClient {
    /// Create a new client from configuration
    ///
    /// Returns an error if a header value cannot be encoded.
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("pt-PT,pt;q=0.9,en;q=0.8"),
        );
        headers.insert(REFERER, HeaderValue::from_static("https://fogos.pt/"));
        headers.insert(ORIGIN, HeaderValue::from_static("https://fogos.pt"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| Error::Config(format!("invalid feed.user_agent: {}", e)))?,
        );

        if let Some(api_key) = config.api_key.as_deref().map(str::trim) {
            if !api_key.is_empty() {
                let auth_value = format!("Bearer {}", api_key);
                headers.insert(
                    AUTHORIZATION,
                    HeaderValue::from_str(&auth_value)
                        .map_err(|e| Error::Config(format!("invalid feed.api_key: {}", e)))?,
                );
            }
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        let endpoints = std::iter::once(config.url.as_str())
            .chain(config.fallback_urls.iter().map(String::as_str))
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            http_client,
            endpoints,
            cache: ConditionalCache::default(),
        })
    }

    /// Endpoints in the order they are tried
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Fetch active incidents, falling back across endpoints
    pub async fn fetch(&mut self) -> Result<Vec<IncidentRecord>> {
        let mut last_error = None;

        for attempt in 0..self.endpoints.len() {
            match self.fetch_endpoint(attempt).await {
                Ok(records) => return Ok(records),
                Err(e) => {
                    tracing::warn!(
                        url = %self.endpoints[attempt],
                        attempt = attempt + 1,
                        error = %e,
                        "Feed endpoint failed"
                    );
                    last_error = Some(e);
                    if attempt + 1 < self.endpoints.len() {
                        tokio::time::sleep(BACKOFF_STEP * (attempt as u32 + 1)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Feed("no feed endpoints configured".to_string())))
    }

    async fn fetch_endpoint(&mut self, attempt: usize) -> Result<Vec<IncidentRecord>> {
        let url = &self.endpoints[attempt];
        let primary = attempt == 0;

        let mut request = self.http_client.get(url);
        if primary {
            if let Some(etag) = &self.cache.etag {
                request = request.header(IF_NONE_MATCH, etag);
            }
            if let Some(modified) = &self.cache.last_modified {
                request = request.header(IF_MODIFIED_SINCE, modified);
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Feed(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            return match (primary, &self.cache.records) {
                (true, Some(records)) => {
                    tracing::debug!("Feed not modified, reusing cached records");
                    Ok(records.clone())
                }
                _ => Err(Error::Feed(format!(
                    "HTTP 304 from {} without a cached response",
                    url
                ))),
            };
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(Error::Feed(format!(
                "API error ({}) GET {}: {}",
                status,
                url,
                truncate(error_text.trim(), 300)
            )));
        }

        let header_text = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v: &HeaderValue| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let etag = header_text(ETAG);
        let last_modified = header_text(LAST_MODIFIED);

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Feed(format!("failed to read response body: {}", e)))?;
        let records = parse_document(&body)?;

        if primary {
            if etag.is_some() || last_modified.is_some() {
                tracing::debug!(
                    etag = etag.as_deref().unwrap_or(""),
                    last_modified = last_modified.as_deref().unwrap_or(""),
                    "Cached feed validators"
                );
            }
            self.cache = ConditionalCache {
                etag,
                last_modified,
                records: Some(records.clone()),
            };
        }

        Ok(records)
    }
}

/// Synchronous wrapper for [`FeedClient`]
///
/// Owns a single-threaded runtime so the blocking monitor loop can drive
/// the async client.
pub struct HttpFeed {
    inner: FeedClient,
    runtime: tokio::runtime::Runtime,
}

impl HttpFeed {
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Feed(format!("failed to create runtime: {}", e)))?;

        Ok(Self {
            inner: FeedClient::new(config)?,
            runtime,
        })
    }
}

impl IncidentFeed for HttpFeed {
    fn fetch(&mut self) -> Result<Vec<IncidentRecord>> {
        self.runtime.block_on(self.inner.fetch())
    }

    fn describe(&self) -> String {
        self.inner.endpoints.join(", ")
    }
}
