//! Shared HTTP plumbing for adapters, collectors and probes.

use chrono::{DateTime, Utc};
use marketsync_core::ProviderError;
use reqwest::header::{ACCEPT, RETRY_AFTER};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::time::Duration;

pub const USER_AGENT: &str = concat!("marketsync/", env!("CARGO_PKG_VERSION"));

/// Longest error body kept in [`ProviderError::Http`].
const MAX_ERROR_BODY: usize = 512;

/// A cheaply clonable client carrying the user agent and JSON accept header.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new() -> Result<Self, ProviderError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ProviderError::Network(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.client.get(url).header(ACCEPT, "application/json")
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.client.post(url).header(ACCEPT, "application/json")
    }

    /// GET a URL and decode the JSON body.
    pub async fn get_json(&self, url: &str, timeout: Duration) -> Result<Value, ProviderError> {
        self.send_json(self.get(url), timeout).await
    }

    /// Send a request and decode the JSON body. Non-2xx responses become
    /// [`ProviderError::Http`] with the `Retry-After` hint, if any.
    pub async fn send_json(
        &self,
        request: RequestBuilder,
        timeout: Duration,
    ) -> Result<Value, ProviderError> {
        let response = request.timeout(timeout).send().await.map_err(map_send_error)?;
        let status = response.status();

        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| parse_retry_after(v, Utc::now()));
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body: truncate(&body),
                retry_after,
            });
        }

        let bytes = response.bytes().await.map_err(map_send_error)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Send a request and return the status with the raw body, whatever the
    /// status. Used by health probes.
    pub async fn send_text(
        &self,
        request: RequestBuilder,
        timeout: Duration,
    ) -> Result<(u16, String), ProviderError> {
        let response = request.timeout(timeout).send().await.map_err(map_send_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_send_error)?;
        Ok((status, body))
    }
}

fn map_send_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Network(e.to_string())
    }
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

/// Parse a `Retry-After` header: delta seconds or an HTTP date.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let wait = at.with_timezone(&Utc) - now;
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}
