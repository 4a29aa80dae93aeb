use crate::source::{QuoteSource, Ticker};
use crate::{code_of, decode_items, millis_of, price_of};
use async_trait::async_trait;
use marketsync_core::numeric::parse_bool;
use marketsync_core::{MarketPair, Provider, ProviderError};
use marketsync_providers::HttpClient;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

pub const BASE_URL: &str = "https://api.kucoin.com";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Symbol {
    #[serde(default)]
    symbol: Value,
    #[serde(default)]
    base_currency: Value,
    #[serde(default)]
    quote_currency: Value,
    #[serde(default)]
    enable_trading: Value,
}

#[derive(Debug, Default, Deserialize)]
struct AllTickers {
    #[serde(default)]
    time: Value,
    #[serde(default)]
    ticker: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawTicker {
    #[serde(default)]
    symbol: Value,
    #[serde(default)]
    buy: Value,
    #[serde(default)]
    sell: Value,
    #[serde(default)]
    last: Value,
}

fn data(body: Value) -> Result<Value, ProviderError> {
    let code = body.get("code").and_then(Value::as_str).unwrap_or("200000");
    if code != "200000" {
        let msg = body.get("msg").and_then(Value::as_str).unwrap_or_default();
        return Err(ProviderError::Api(format!("KuCoin code {code}: {msg}")));
    }
    Ok(body.get("data").cloned().unwrap_or(Value::Null))
}

pub fn parse_symbols(body: Value) -> Result<Vec<MarketPair>, ProviderError> {
    let items = match data(body)? {
        Value::Array(items) => items,
        _ => return Err(ProviderError::Parse("KuCoin symbols: data is not a list".into())),
    };
    Ok(decode_items::<Symbol>("kucoin", &items)
        .into_iter()
        .filter(|s| parse_bool(&[&s.enable_trading]))
        .map(|s| MarketPair {
            symbol: code_of(&s.symbol),
            base: code_of(&s.base_currency),
            quote: code_of(&s.quote_currency),
        })
        .filter(|p| !p.symbol.is_empty() && !p.base.is_empty() && !p.quote.is_empty())
        .collect())
}

pub fn parse_tickers(body: Value) -> Result<Vec<Ticker>, ProviderError> {
    let all: AllTickers = serde_json::from_value(data(body)?)?;
    let ts_ms = millis_of(&all.time);
    Ok(decode_items::<RawTicker>("kucoin", &all.ticker)
        .into_iter()
        .map(|t| Ticker {
            symbol: code_of(&t.symbol),
            bid: price_of(&t.buy),
            ask: price_of(&t.sell),
            last: price_of(&t.last),
            ts_ms,
            ..Ticker::default()
        })
        .filter(|t| !t.symbol.is_empty())
        .collect())
}

pub struct KucoinSource {
    http: HttpClient,
    base_url: String,
}

impl KucoinSource {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            base_url: BASE_URL.to_string(),
        }
    }
}

#[async_trait]
impl QuoteSource for KucoinSource {
    fn provider(&self) -> Provider {
        Provider::Kucoin
    }

    async fn symbols(&self, timeout: Duration) -> Result<Vec<MarketPair>, ProviderError> {
        let url = format!("{}/api/v2/symbols", self.base_url);
        parse_symbols(self.http.get_json(&url, timeout).await?)
    }

    async fn tickers(&self, timeout: Duration) -> Result<Vec<Ticker>, ProviderError> {
        let url = format!("{}/api/v1/market/allTickers", self.base_url);
        parse_tickers(self.http.get_json(&url, timeout).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_symbols_and_tickers() {
        let symbols = json!({
            "code": "200000",
            "data": [
                {"symbol": "BTC-USDT", "baseCurrency": "BTC", "quoteCurrency": "USDT", "enableTrading": true},
                {"symbol": "DEAD-USDT", "baseCurrency": "DEAD", "quoteCurrency": "USDT", "enableTrading": false}
            ]
        });
        let pairs = parse_symbols(symbols).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].symbol, "BTC-USDT");

        let tickers = json!({
            "code": "200000",
            "data": {"time": 1700000000000_i64, "ticker": [
                {"symbol": "BTC-USDT", "buy": "64999.9", "sell": "65000", "last": "65000"}
            ]}
        });
        let tickers = parse_tickers(tickers).unwrap();
        assert_eq!(tickers[0].ask, Some(dec!(65000)));
        assert_eq!(tickers[0].ts_ms, Some(1_700_000_000_000));
    }

    #[test]
    fn test_error_code() {
        let body = json!({"code": "429000", "msg": "Too Many Requests"});
        assert!(parse_tickers(body).is_err());
    }
}
