//! Open Exchange Rates `latest.json`: one reference rate per currency against
//! the payload's base (USD on the free plan), published as a synthetic
//! `BASE/QUOTE` quote with bid = ask = last.

use crate::source::{QuoteSource, Ticker};
use crate::{code_of, price_of};
use async_trait::async_trait;
use marketsync_core::{MarketPair, Provider, ProviderError};
use marketsync_providers::HttpClient;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;

pub const BASE_URL: &str = "https://openexchangerates.org/api";

const DEFAULT_BASE: &str = "USD";

#[derive(Debug, Default, Deserialize)]
struct Latest {
    #[serde(default)]
    error: bool,
    #[serde(default)]
    message: Value,
    #[serde(default)]
    description: Value,
    #[serde(default)]
    base: Value,
    #[serde(default)]
    timestamp: Value,
    #[serde(default)]
    rates: Value,
}

/// The rates of one `latest.json` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct RateBoard {
    pub base: String,
    pub ts_ms: Option<i64>,
    pub rates: Vec<(String, Value)>,
}

impl RateBoard {
    pub fn parse(body: Value) -> Result<Self, ProviderError> {
        let latest: Latest = serde_json::from_value(body)?;
        if latest.error {
            return Err(ProviderError::Api(format!(
                "Open Exchange Rates {}: {}",
                latest.message.as_str().unwrap_or("error"),
                latest.description.as_str().unwrap_or_default()
            )));
        }
        let base = Some(code_of(&latest.base))
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE.to_string());
        let ts_ms = latest
            .timestamp
            .as_i64()
            .filter(|s| *s > 0)
            .and_then(|s| s.checked_mul(1000));
        let rates = match latest.rates {
            Value::Object(map) => map_rates(map, &base),
            _ => Vec::new(),
        };
        Ok(Self { base, ts_ms, rates })
    }

    fn symbol(&self, quote: &str) -> String {
        format!("{}/{quote}", self.base)
    }

    pub fn pairs(&self) -> Vec<MarketPair> {
        self.rates
            .iter()
            .map(|(quote, _)| MarketPair {
                symbol: self.symbol(quote),
                base: self.base.clone(),
                quote: quote.clone(),
            })
            .collect()
    }

    pub fn tickers(&self) -> Vec<Ticker> {
        self.rates
            .iter()
            .map(|(quote, rate)| {
                let px = price_of(rate);
                Ticker {
                    symbol: self.symbol(quote),
                    bid: px,
                    ask: px,
                    last: px,
                    ts_ms: self.ts_ms,
                    fee_taker_bps: None,
                    synthetic: true,
                }
            })
            .collect()
    }
}

fn map_rates(map: Map<String, Value>, base: &str) -> Vec<(String, Value)> {
    map.into_iter()
        .map(|(code, rate)| (code.trim().to_ascii_uppercase(), rate))
        .filter(|(code, _)| !code.is_empty() && code != base)
        .collect()
}

pub struct OpenExchangeRatesSource {
    http: HttpClient,
    base_url: String,
    app_id: String,
}

impl OpenExchangeRatesSource {
    pub fn new(http: HttpClient, app_id: String) -> Self {
        Self {
            http,
            base_url: BASE_URL.to_string(),
            app_id,
        }
    }

    async fn latest(&self, timeout: Duration) -> Result<RateBoard, ProviderError> {
        let request = self
            .http
            .get(&format!("{}/latest.json", self.base_url))
            .query(&[("app_id", self.app_id.as_str())]);
        RateBoard::parse(self.http.send_json(request, timeout).await?)
    }
}

#[async_trait]
impl QuoteSource for OpenExchangeRatesSource {
    fn provider(&self) -> Provider {
        Provider::Openexchangerates
    }

    async fn symbols(&self, timeout: Duration) -> Result<Vec<MarketPair>, ProviderError> {
        Ok(self.latest(timeout).await?.pairs())
    }

    async fn tickers(&self, timeout: Duration) -> Result<Vec<Ticker>, ProviderError> {
        Ok(self.latest(timeout).await?.tickers())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_latest_rates_become_synthetic_quotes() {
        let body = json!({
            "disclaimer": "Usage subject to terms",
            "timestamp": 1700000000,
            "base": "USD",
            "rates": {"EUR": 0.9213, "RUB": "92.5", "USD": 1, "XXX": "n/a"}
        });
        let board = RateBoard::parse(body).unwrap();
        assert_eq!(board.base, "USD");
        assert_eq!(board.ts_ms, Some(1_700_000_000_000));

        let mut pairs = board.pairs();
        pairs.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        let symbols: Vec<&str> = pairs.iter().map(|p| p.symbol.as_str()).collect();
        assert_eq!(symbols, ["USD/EUR", "USD/RUB", "USD/XXX"]);

        let tickers = board.tickers();
        let eur = tickers.iter().find(|t| t.symbol == "USD/EUR").unwrap();
        assert_eq!(eur.bid, Some(dec!(0.9213)));
        assert_eq!(eur.ask, eur.bid);
        assert_eq!(eur.last, eur.bid);
        assert!(eur.synthetic);
        let junk = tickers.iter().find(|t| t.symbol == "USD/XXX").unwrap();
        assert_eq!(junk.bid, None);
    }

    #[test]
    fn test_missing_rates_and_error_payload() {
        let board = RateBoard::parse(json!({"base": ""})).unwrap();
        assert_eq!(board.base, "USD");
        assert!(board.rates.is_empty());
        assert_eq!(board.ts_ms, None);

        let err = RateBoard::parse(json!({
            "error": true,
            "status": 401,
            "message": "invalid_app_id",
            "description": "Invalid App ID provided."
        }))
        .unwrap_err();
        assert!(matches!(err, ProviderError::Api(msg) if msg.contains("invalid_app_id")));
    }
}
