//! Rapira publishes every market with its best bid/ask in one public call,
//! so the same payload answers both the symbol and the ticker request.

use crate::source::{QuoteSource, Ticker};
use crate::{code_of, decode_items, price_of};
use async_trait::async_trait;
use marketsync_core::{MarketPair, Provider, ProviderError};
use marketsync_providers::HttpClient;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

pub const BASE_URL: &str = "https://api.rapira.net";

/// Quote codes tried, in order, on symbols without a separator.
const KNOWN_QUOTES: [&str; 8] = ["USDT", "USDC", "BTC", "ETH", "RUB", "USD", "EUR", "UAH"];

const BPS_PER_UNIT: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Rate {
    #[serde(default)]
    symbol: Value,
    #[serde(default)]
    bid_price: Value,
    #[serde(default)]
    ask_price: Value,
    #[serde(default)]
    close: Value,
    #[serde(default)]
    fee: Value,
}

/// `BTC/USDT`, `BTC_USDT`, `BTC-USDT` or a bare `BTCUSDT` ending in a known
/// quote code.
pub fn split_symbol(symbol: &str) -> Option<(String, String)> {
    let symbol = symbol.trim().to_ascii_uppercase();
    if let Some((base, quote)) = symbol.split_once(['/', '_', '-']) {
        return (!base.is_empty() && !quote.is_empty()).then(|| (base.to_string(), quote.to_string()));
    }
    KNOWN_QUOTES.iter().find_map(|quote| {
        let base = symbol.strip_suffix(quote)?;
        (!base.is_empty()).then(|| (base.to_string(), quote.to_string()))
    })
}

fn rates(body: &Value) -> Vec<Rate> {
    let items = body
        .get("data")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    decode_items("rapira", items)
}

/// Fee as a fraction (`0.0015`) to whole basis points (`15`).
fn fee_bps(value: &Value) -> Option<Decimal> {
    let bps = price_of(value)?.checked_mul(BPS_PER_UNIT)?.trunc();
    (bps > Decimal::ZERO && bps < BPS_PER_UNIT).then_some(bps)
}

pub fn parse_symbols(body: &Value) -> Vec<MarketPair> {
    rates(body)
        .into_iter()
        .filter_map(|rate| {
            let symbol = code_of(&rate.symbol);
            let (base, quote) = split_symbol(&symbol)?;
            Some(MarketPair { symbol, base, quote })
        })
        .collect()
}

pub fn parse_tickers(body: &Value) -> Vec<Ticker> {
    rates(body)
        .into_iter()
        .map(|rate| Ticker {
            symbol: code_of(&rate.symbol),
            bid: price_of(&rate.bid_price),
            ask: price_of(&rate.ask_price),
            last: price_of(&rate.close),
            fee_taker_bps: fee_bps(&rate.fee),
            ..Ticker::default()
        })
        .filter(|t| !t.symbol.is_empty())
        .collect()
}

pub struct RapiraSource {
    http: HttpClient,
    base_url: String,
}

impl RapiraSource {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            base_url: BASE_URL.to_string(),
        }
    }

    async fn fetch(&self, timeout: Duration) -> Result<Value, ProviderError> {
        let url = format!("{}/open/market/rates", self.base_url);
        self.http.get_json(&url, timeout).await
    }
}

#[async_trait]
impl QuoteSource for RapiraSource {
    fn provider(&self) -> Provider {
        Provider::Rapira
    }

    async fn symbols(&self, timeout: Duration) -> Result<Vec<MarketPair>, ProviderError> {
        Ok(parse_symbols(&self.fetch(timeout).await?))
    }

    async fn tickers(&self, timeout: Duration) -> Result<Vec<Ticker>, ProviderError> {
        Ok(parse_tickers(&self.fetch(timeout).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_split_symbol_forms() {
        let pair = |b: &str, q: &str| Some((b.to_string(), q.to_string()));
        assert_eq!(split_symbol("btc/usdt"), pair("BTC", "USDT"));
        assert_eq!(split_symbol("ETH_RUB"), pair("ETH", "RUB"));
        assert_eq!(split_symbol("TON-USDT"), pair("TON", "USDT"));
        assert_eq!(split_symbol("SOLUSDC"), pair("SOL", "USDC"));
        assert_eq!(split_symbol("USDT"), None);
        assert_eq!(split_symbol("XYZABC"), None);
        assert_eq!(split_symbol("/USDT"), None);
    }

    #[test]
    fn test_rates_map_to_pairs_and_tickers() {
        let body = json!({
            "data": [
                {"symbol": "BTC/USDT", "bidPrice": 65000.1, "askPrice": "65010.2", "close": "65005", "fee": "0.0015"},
                {"symbol": "USDT/RUB", "bidPrice": "92.1", "askPrice": "92.4"},
                {"symbol": "???", "bidPrice": "1", "askPrice": "1"},
                "junk"
            ]
        });

        let pairs = parse_symbols(&body);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].symbol, "BTC/USDT");
        assert_eq!(pairs[1].quote, "RUB");

        let tickers = parse_tickers(&body);
        assert_eq!(tickers.len(), 3);
        assert_eq!(tickers[0].bid, Some(dec!(65000.1)));
        assert_eq!(tickers[0].ask, Some(dec!(65010.2)));
        assert_eq!(tickers[0].last, Some(dec!(65005)));
        assert_eq!(tickers[0].fee_taker_bps, Some(dec!(15)));
        assert_eq!(tickers[0].ts_ms, None);
        assert_eq!(tickers[1].fee_taker_bps, None);
        assert!(!tickers[1].synthetic);
    }

    #[test]
    fn test_unexpected_body_is_empty() {
        assert!(parse_tickers(&json!({"data": {"BTC/USDT": {}}})).is_empty());
        assert!(parse_symbols(&json!([])).is_empty());
    }
}
