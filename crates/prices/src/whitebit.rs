use crate::source::{QuoteSource, Ticker};
use crate::{code_of, decode_items, millis_of, price_of};
use async_trait::async_trait;
use marketsync_core::numeric::parse_bool;
use marketsync_core::{MarketPair, Provider, ProviderError};
use marketsync_providers::HttpClient;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;

pub const BASE_URL: &str = "https://whitebit.com";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Market {
    #[serde(default)]
    name: Value,
    #[serde(default)]
    stock: Value,
    #[serde(default)]
    money: Value,
    #[serde(default)]
    trades_enabled: Value,
}

#[derive(Debug, Deserialize)]
struct TickersEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    result: Value,
}

#[derive(Debug, Default, Deserialize)]
struct MarketTicker {
    #[serde(default)]
    at: Value,
    #[serde(default)]
    ticker: Value,
}

pub fn parse_symbols(body: Value) -> Result<Vec<MarketPair>, ProviderError> {
    let items = match body {
        Value::Array(items) => items,
        _ => return Err(ProviderError::Parse("WhiteBIT markets: expected a list".into())),
    };
    Ok(decode_items::<Market>("whitebit", &items)
        .into_iter()
        .filter(|m| m.trades_enabled.is_null() || parse_bool(&[&m.trades_enabled]))
        .map(|m| MarketPair {
            symbol: code_of(&m.name),
            base: code_of(&m.stock),
            quote: code_of(&m.money),
        })
        .filter(|p| !p.symbol.is_empty() && !p.base.is_empty() && !p.quote.is_empty())
        .collect())
}

/// `result` is keyed by `BASE_QUOTE`; `at` is in seconds.
pub fn parse_tickers(body: Value) -> Result<Vec<Ticker>, ProviderError> {
    let envelope: TickersEnvelope = serde_json::from_value(body)?;
    let result: Map<String, Value> = match envelope.result {
        Value::Object(map) if envelope.success => map,
        _ => return Err(ProviderError::Api("WhiteBIT tickers: unexpected envelope".into())),
    };

    Ok(result
        .into_iter()
        .map(|(market, raw)| {
            let entry: MarketTicker = serde_json::from_value(raw).unwrap_or_default();
            let field = |name: &str| entry.ticker.get(name).and_then(price_of);
            Ticker {
                symbol: market.trim().to_ascii_uppercase(),
                bid: field("bid"),
                ask: field("ask"),
                last: field("last"),
                ts_ms: millis_of(&entry.at).map(|s| s * 1000),
                ..Ticker::default()
            }
        })
        .filter(|t| !t.symbol.is_empty())
        .collect())
}

pub struct WhitebitSource {
    http: HttpClient,
    base_url: String,
}

impl WhitebitSource {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            base_url: BASE_URL.to_string(),
        }
    }
}

#[async_trait]
impl QuoteSource for WhitebitSource {
    fn provider(&self) -> Provider {
        Provider::Whitebit
    }

    async fn symbols(&self, timeout: Duration) -> Result<Vec<MarketPair>, ProviderError> {
        let url = format!("{}/api/v4/public/markets", self.base_url);
        parse_symbols(self.http.get_json(&url, timeout).await?)
    }

    async fn tickers(&self, timeout: Duration) -> Result<Vec<Ticker>, ProviderError> {
        let url = format!("{}/api/v1/public/tickers", self.base_url);
        parse_tickers(self.http.get_json(&url, timeout).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_markets() {
        let body = json!([
            {"name": "BTC_USDT", "stock": "BTC", "money": "USDT", "tradesEnabled": true},
            {"name": "XYZ_USDT", "stock": "XYZ", "money": "USDT", "tradesEnabled": false}
        ]);
        let pairs = parse_symbols(body).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].quote, "USDT");
    }

    #[test]
    fn test_tickers_seconds_to_millis() {
        let body = json!({
            "success": true,
            "result": {
                "BTC_USDT": {"at": 1700000000, "ticker": {"bid": "65000", "ask": "65001", "last": "65000.5"}}
            }
        });
        let tickers = parse_tickers(body).unwrap();
        assert_eq!(tickers.len(), 1);
        assert_eq!(tickers[0].symbol, "BTC_USDT");
        assert_eq!(tickers[0].last, Some(dec!(65000.5)));
        assert_eq!(tickers[0].ts_ms, Some(1_700_000_000_000));

        assert!(parse_tickers(json!({"success": false, "result": {}})).is_err());
    }
}
