use crate::source::{QuoteSource, Ticker};
use crate::{code_of, decode_items, millis_of, price_of};
use async_trait::async_trait;
use marketsync_core::{MarketPair, Provider, ProviderError};
use marketsync_providers::HttpClient;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

pub const BASE_URL: &str = "https://api.bybit.com";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    ret_code: i64,
    #[serde(default)]
    ret_msg: String,
    #[serde(default)]
    result: ListResult,
    #[serde(default)]
    time: Value,
}

#[derive(Debug, Default, Deserialize)]
struct ListResult {
    #[serde(default)]
    list: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instrument {
    #[serde(default)]
    symbol: Value,
    #[serde(default)]
    base_coin: Value,
    #[serde(default)]
    quote_coin: Value,
    #[serde(default)]
    status: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTicker {
    #[serde(default)]
    symbol: Value,
    #[serde(default)]
    bid1_price: Value,
    #[serde(default)]
    ask1_price: Value,
    #[serde(default)]
    last_price: Value,
}

fn envelope(body: Value) -> Result<Envelope, ProviderError> {
    let envelope: Envelope = serde_json::from_value(body)?;
    if envelope.ret_code != 0 {
        return Err(ProviderError::Api(format!(
            "Bybit retCode {}: {}",
            envelope.ret_code, envelope.ret_msg
        )));
    }
    Ok(envelope)
}

pub fn parse_symbols(body: Value) -> Result<Vec<MarketPair>, ProviderError> {
    let envelope = envelope(body)?;
    Ok(decode_items::<Instrument>("bybit", &envelope.result.list)
        .into_iter()
        .filter(|i| i.status.as_str().map_or(true, |s| s.eq_ignore_ascii_case("trading")))
        .filter_map(|i| {
            let pair = MarketPair {
                symbol: code_of(&i.symbol),
                base: code_of(&i.base_coin),
                quote: code_of(&i.quote_coin),
            };
            (!pair.symbol.is_empty() && !pair.base.is_empty() && !pair.quote.is_empty())
                .then_some(pair)
        })
        .collect())
}

pub fn parse_tickers(body: Value) -> Result<Vec<Ticker>, ProviderError> {
    let envelope = envelope(body)?;
    let ts_ms = millis_of(&envelope.time);
    Ok(decode_items::<RawTicker>("bybit", &envelope.result.list)
        .into_iter()
        .map(|t| Ticker {
            symbol: code_of(&t.symbol),
            bid: price_of(&t.bid1_price),
            ask: price_of(&t.ask1_price),
            last: price_of(&t.last_price),
            ts_ms,
            ..Ticker::default()
        })
        .filter(|t| !t.symbol.is_empty())
        .collect())
}

pub struct BybitSource {
    http: HttpClient,
    base_url: String,
}

impl BybitSource {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            base_url: BASE_URL.to_string(),
        }
    }
}

#[async_trait]
impl QuoteSource for BybitSource {
    fn provider(&self) -> Provider {
        Provider::Bybit
    }

    async fn symbols(&self, timeout: Duration) -> Result<Vec<MarketPair>, ProviderError> {
        let url = format!("{}/v5/market/instruments-info?category=spot", self.base_url);
        parse_symbols(self.http.get_json(&url, timeout).await?)
    }

    async fn tickers(&self, timeout: Duration) -> Result<Vec<Ticker>, ProviderError> {
        let url = format!("{}/v5/market/tickers?category=spot", self.base_url);
        parse_tickers(self.http.get_json(&url, timeout).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_symbols_keep_trading_only() {
        let body = json!({
            "retCode": 0,
            "result": {"list": [
                {"symbol": "BTCUSDT", "baseCoin": "BTC", "quoteCoin": "USDT", "status": "Trading"},
                {"symbol": "OLDUSDT", "baseCoin": "OLD", "quoteCoin": "USDT", "status": "Closed"},
                {"symbol": "", "baseCoin": "X", "quoteCoin": "Y"}
            ]}
        });
        let pairs = parse_symbols(body).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].base, "BTC");
    }

    #[test]
    fn test_tickers_carry_envelope_time() {
        let body = json!({
            "retCode": 0,
            "time": 1700000000123_i64,
            "result": {"list": [
                {"symbol": "BTCUSDT", "bid1Price": "65000.1", "ask1Price": "65000.2", "lastPrice": "65000.1"},
                {"symbol": "ETHUSDT", "bid1Price": "", "ask1Price": "3000"}
            ]}
        });
        let tickers = parse_tickers(body).unwrap();
        assert_eq!(tickers.len(), 2);
        assert_eq!(tickers[0].bid, Some(dec!(65000.1)));
        assert_eq!(tickers[0].ts_ms, Some(1_700_000_000_123));
        assert_eq!(tickers[1].bid, None);
    }

    #[test]
    fn test_error_envelope() {
        let body = json!({"retCode": 10006, "retMsg": "Too many visits"});
        assert!(matches!(parse_tickers(body), Err(ProviderError::Api(_))));
    }
}
