//! Status and time probes.
//!
//! A status probe can only ever prove a provider is down. Anything short of an
//! explicit maintenance signal falls through to the time probe.

use crate::{HealthCode, HealthResult};
use async_trait::async_trait;
use marketsync_core::{Provider, ProviderError};
use marketsync_providers::{bybit, htx, kucoin, mexc, rapira, whitebit, HttpClient};
use serde_json::Value;
use std::time::{Duration, Instant};

/// Raw GET used by the probes: status code and body, whatever the status.
#[async_trait]
pub trait ProbeClient: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<(u16, String), ProviderError>;
}

pub struct HttpProbe {
    http: HttpClient,
}

impl HttpProbe {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ProbeClient for HttpProbe {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<(u16, String), ProviderError> {
        self.http.send_text(self.http.get(url), timeout).await
    }
}

pub fn status_url(provider: Provider) -> Option<String> {
    let url = match provider {
        Provider::Whitebit => format!("{}/api/v4/public/platform/status", whitebit::BASE_URL),
        Provider::Bybit => format!("{}/v5/system/status", bybit::BASE_URL),
        Provider::Htx => format!("{}/v2/market-status", htx::BASE_URLS[1]),
        _ => return None,
    };
    Some(url)
}

pub fn time_url(provider: Provider) -> Option<String> {
    let url = match provider {
        Provider::Kucoin => format!("{}/api/v1/timestamp", kucoin::BASE_URL),
        Provider::Whitebit => format!("{}/api/v4/public/time", whitebit::BASE_URL),
        Provider::Mexc => format!("{}/api/v3/time", mexc::BASE_URL),
        Provider::Bybit => format!("{}/v5/market/time", bybit::BASE_URL),
        Provider::Rapira => format!("{}/open/system/time", rapira::BASE_URL),
        Provider::Htx => format!("{}/v1/common/timestamp", htx::BASE_URLS[1]),
        Provider::Twelvedata | Provider::Openexchangerates | Provider::Manual => return None,
    };
    Some(url)
}

fn elapsed_ms(started: Instant) -> i32 {
    i32::try_from(started.elapsed().as_millis()).unwrap_or(i32::MAX)
}

fn int_at(body: &Value, path: &[&str]) -> Option<i64> {
    path.iter()
        .try_fold(body, |node, key| node.get(*key))
        .and_then(Value::as_i64)
}

/// Read a 200 status page body.
pub fn interpret_status(provider: Provider, body: &str, latency_ms: i32) -> HealthResult {
    let data: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let text = body.to_ascii_lowercase();
    let down = |detail: String| HealthResult::new(false, HealthCode::Maintenance, detail, latency_ms);
    let ok = |detail: String| HealthResult::new(true, HealthCode::Ok, detail, latency_ms);

    match provider {
        Provider::Whitebit => {
            let status = int_at(&data, &["status"]).or_else(|| int_at(&data, &["result", "status"]));
            match status {
                Some(1) => ok("status=1".into()),
                Some(other) => down(format!("status={other}")),
                None if text.contains("maintenance") => down("maintenance in body".into()),
                None => ok("no explicit status".into()),
            }
        }
        Provider::Bybit => {
            if text.contains("mainten") || text.contains("shutdown") {
                return down("maintenance/shutdown".into());
            }
            match int_at(&data, &["retCode"]) {
                Some(0) => ok("retCode=0".into()),
                other => HealthResult::new(
                    true,
                    HealthCode::Unknown,
                    format!("retCode={}", other.map(|c| c.to_string()).unwrap_or_else(|| "none".into())),
                    latency_ms,
                ),
            }
        }
        Provider::Htx => match int_at(&data, &["data", "marketStatus"]) {
            Some(1) => ok("marketStatus=1".into()),
            Some(status @ (2 | 3)) => down(format!("marketStatus={status}")),
            _ => HealthResult::new(true, HealthCode::Unknown, "unparsed status", latency_ms),
        },
        _ => HealthResult::new(true, HealthCode::Unknown, "unparsed status", latency_ms),
    }
}

/// Status page probe. Never reports down except on an explicit signal.
pub async fn probe_status(
    client: &dyn ProbeClient,
    provider: Provider,
    url: &str,
    timeout: Duration,
) -> HealthResult {
    let started = Instant::now();
    match client.fetch(url, timeout).await {
        Ok((200, body)) => interpret_status(provider, &body, elapsed_ms(started)),
        Ok((status, _)) => HealthResult::new(
            false,
            HealthCode::from_http_status(status),
            format!("HTTP {status}"),
            elapsed_ms(started),
        ),
        Err(e) => HealthResult::new(true, HealthCode::Unknown, e.to_string(), elapsed_ms(started)),
    }
}

/// Lightweight reachability probe: any 200 is up.
pub async fn probe_time(client: &dyn ProbeClient, url: &str, timeout: Duration) -> HealthResult {
    let started = Instant::now();
    match client.fetch(url, timeout).await {
        Ok((status, _)) => {
            let code = HealthCode::from_http_status(status);
            HealthResult::new(code == HealthCode::Ok, code, format!("HTTP {status}"), elapsed_ms(started))
        }
        Err(e) => HealthResult::new(false, HealthCode::NetworkDown, e.to_string(), elapsed_ms(started)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitebit_status() {
        let r = interpret_status(Provider::Whitebit, r#"{"status":1}"#, 5);
        assert!(r.available);
        assert_eq!(r.code, HealthCode::Ok);

        let r = interpret_status(Provider::Whitebit, r#"{"result":{"status":0}}"#, 5);
        assert!(!r.available);
        assert_eq!(r.code, HealthCode::Maintenance);

        let r = interpret_status(Provider::Whitebit, "Scheduled maintenance", 5);
        assert_eq!(r.code, HealthCode::Maintenance);
    }

    #[test]
    fn test_bybit_status() {
        let r = interpret_status(
            Provider::Bybit,
            r#"{"retCode":0,"result":{"list":[{"state":"scheduled maintenance"}]}}"#,
            5,
        );
        assert_eq!(r.code, HealthCode::Maintenance);

        let r = interpret_status(Provider::Bybit, r#"{"retCode":0,"result":{"list":[]}}"#, 5);
        assert_eq!(r.code, HealthCode::Ok);

        let r = interpret_status(Provider::Bybit, r#"{"retCode":10002}"#, 5);
        assert!(r.available);
        assert_eq!(r.code, HealthCode::Unknown);
    }

    #[test]
    fn test_htx_status() {
        let r = interpret_status(Provider::Htx, r#"{"code":200,"data":{"marketStatus":1}}"#, 5);
        assert_eq!(r.code, HealthCode::Ok);
        let r = interpret_status(Provider::Htx, r#"{"code":200,"data":{"marketStatus":2}}"#, 5);
        assert!(!r.available);
        assert_eq!(r.code, HealthCode::Maintenance);
    }

    #[test]
    fn test_probe_urls() {
        assert!(status_url(Provider::Kucoin).is_none());
        assert_eq!(
            time_url(Provider::Kucoin).as_deref(),
            Some("https://api.kucoin.com/api/v1/timestamp")
        );
        assert!(time_url(Provider::Manual).is_none());
        for provider in [Provider::Whitebit, Provider::Bybit, Provider::Htx] {
            assert!(status_url(provider).is_some());
            assert!(time_url(provider).is_some());
        }
    }
}
