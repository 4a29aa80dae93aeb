//! HTX market data. Hosts are tried in order, like the wallet adapter.

use crate::source::{QuoteSource, Ticker};
use crate::{code_of, decode_items, millis_of, price_of};
use async_trait::async_trait;
use marketsync_core::{MarketPair, Provider, ProviderError};
use marketsync_providers::htx::BASE_URLS;
use marketsync_providers::HttpClient;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Vec<Value>,
    #[serde(default)]
    ts: Value,
}

#[derive(Debug, Deserialize)]
struct Symbol {
    #[serde(default)]
    symbol: Value,
    #[serde(default, rename = "base-currency")]
    base_currency: Value,
    #[serde(default, rename = "quote-currency")]
    quote_currency: Value,
    #[serde(default)]
    state: Value,
}

#[derive(Debug, Deserialize)]
struct RawTicker {
    #[serde(default)]
    symbol: Value,
    #[serde(default)]
    bid: Value,
    #[serde(default)]
    ask: Value,
    #[serde(default)]
    close: Value,
}

pub fn parse_symbols(body: Value) -> Result<Vec<MarketPair>, ProviderError> {
    let envelope: Envelope = serde_json::from_value(body)?;
    Ok(decode_items::<Symbol>("htx", &envelope.data)
        .into_iter()
        .filter(|s| {
            matches!(
                s.state.as_str().map(str::to_ascii_lowercase).as_deref(),
                Some("online") | Some("operating")
            )
        })
        .map(|s| MarketPair {
            symbol: code_of(&s.symbol),
            base: code_of(&s.base_currency),
            quote: code_of(&s.quote_currency),
        })
        .filter(|p| !p.symbol.is_empty() && !p.base.is_empty() && !p.quote.is_empty())
        .collect())
}

pub fn parse_tickers(body: Value) -> Result<Vec<Ticker>, ProviderError> {
    let envelope: Envelope = serde_json::from_value(body)?;
    let ts_ms = millis_of(&envelope.ts);
    Ok(decode_items::<RawTicker>("htx", &envelope.data)
        .into_iter()
        .map(|t| Ticker {
            symbol: code_of(&t.symbol),
            bid: price_of(&t.bid),
            ask: price_of(&t.ask),
            last: price_of(&t.close),
            ts_ms,
            ..Ticker::default()
        })
        .filter(|t| !t.symbol.is_empty())
        .collect())
}

pub struct HtxSource {
    http: HttpClient,
    base_urls: Vec<String>,
}

impl HtxSource {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            base_urls: BASE_URLS.iter().map(|s| s.to_string()).collect(),
        }
    }

    async fn get_any(&self, path: &str, timeout: Duration) -> Result<Value, ProviderError> {
        let mut last_error = None;
        for base in &self.base_urls {
            match self.http.get_json(&format!("{base}{path}"), timeout).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    tracing::debug!(base = %base, path, error = %e, "HTX host failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ProviderError::Network("no HTX hosts configured".into())))
    }
}

#[async_trait]
impl QuoteSource for HtxSource {
    fn provider(&self) -> Provider {
        Provider::Htx
    }

    async fn symbols(&self, timeout: Duration) -> Result<Vec<MarketPair>, ProviderError> {
        parse_symbols(self.get_any("/v1/common/symbols", timeout).await?)
    }

    async fn tickers(&self, timeout: Duration) -> Result<Vec<Ticker>, ProviderError> {
        parse_tickers(self.get_any("/market/tickers", timeout).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_symbols_filter_state_and_upper_case() {
        let body = json!({"data": [
            {"symbol": "btcusdt", "base-currency": "btc", "quote-currency": "usdt", "state": "online"},
            {"symbol": "oldusdt", "base-currency": "old", "quote-currency": "usdt", "state": "offline"}
        ]});
        let pairs = parse_symbols(body).unwrap();
        assert_eq!(
            pairs,
            vec![MarketPair {
                symbol: "BTCUSDT".into(),
                base: "BTC".into(),
                quote: "USDT".into()
            }]
        );
    }

    #[test]
    fn test_tickers_use_close_as_last() {
        let body = json!({"ts": 1700000000000_i64, "data": [
            {"symbol": "btcusdt", "bid": 65000.1, "ask": 65000.3, "close": 65000.2}
        ]});
        let tickers = parse_tickers(body).unwrap();
        assert_eq!(tickers[0].symbol, "BTCUSDT");
        assert_eq!(tickers[0].last, Some(dec!(65000.2)));
        assert_eq!(tickers[0].ts_ms, Some(1_700_000_000_000));
    }
}
