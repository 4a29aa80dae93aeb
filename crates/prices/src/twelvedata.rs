//! Twelve Data forex rates.
//!
//! The pair list comes from `/forex_pairs`; quotes are fetched in batches
//! from `/quote`. Rows without a usable bid/ask fall back to a single
//! reference price (close, then price, then rate) on both sides.

use crate::source::{QuoteSource, Ticker};
use crate::{code_of, price_of};
use async_trait::async_trait;
use marketsync_core::{MarketPair, Provider, ProviderError};
use marketsync_providers::HttpClient;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub const BASE_URL: &str = "https://api.twelvedata.com";

/// Symbols per `/quote` call.
pub const QUOTE_BATCH: usize = 30;

const FALLBACK_FIELDS: [&str; 3] = ["close", "price", "rate"];

fn check_error(body: &Value) -> Result<(), ProviderError> {
    if body.get("status").and_then(Value::as_str) == Some("error") {
        let code = body.get("code").and_then(Value::as_i64).unwrap_or_default();
        let message = body.get("message").and_then(Value::as_str).unwrap_or_default();
        return Err(ProviderError::Api(format!("Twelve Data code {code}: {message}")));
    }
    Ok(())
}

fn present(row: &Value, name: &str) -> Option<Value> {
    row.get(name)
        .filter(|v| !v.is_null() && v.as_str().map_or(true, |s| !s.trim().is_empty()))
        .cloned()
}

pub fn parse_forex_pairs(body: &Value) -> Result<Vec<MarketPair>, ProviderError> {
    check_error(body)?;
    let items = body
        .get("data")
        .unwrap_or(body)
        .as_array()
        .ok_or_else(|| ProviderError::Parse("Twelve Data forex_pairs: data is not a list".into()))?;
    let pairs: Vec<MarketPair> = items
        .iter()
        .filter_map(|item| {
            let symbol = code_of(item.get("symbol")?);
            let (base, quote) = symbol.split_once('/')?;
            let (base, quote) = (base.trim().to_string(), quote.trim().to_string());
            (!base.is_empty() && !quote.is_empty()).then_some(MarketPair { symbol, base, quote })
        })
        .collect();
    if pairs.is_empty() {
        return Err(ProviderError::Parse("Twelve Data forex_pairs: no symbols".into()));
    }
    Ok(pairs)
}

fn quote_ticker(symbol: &str, row: &Value) -> Ticker {
    let mut ticker = Ticker {
        symbol: symbol.to_string(),
        bid: present(row, "bid").as_ref().and_then(price_of),
        ask: present(row, "ask").as_ref().and_then(price_of),
        last: present(row, "close")
            .or_else(|| present(row, "price"))
            .as_ref()
            .and_then(price_of),
        ..Ticker::default()
    };
    let positive = |side: Option<Decimal>| side.is_some_and(|v| v > Decimal::ZERO);
    if positive(ticker.bid) && positive(ticker.ask) {
        return ticker;
    }

    let reference = FALLBACK_FIELDS
        .iter()
        .find_map(|name| present(row, name))
        .as_ref()
        .and_then(price_of)
        .filter(|px| *px > Decimal::ZERO);
    ticker.bid = reference;
    ticker.ask = reference;
    ticker.synthetic = reference.is_some();
    ticker
}

/// One ticker per requested symbol. Symbols missing from the response come
/// back without prices so the collector counts them as skipped.
///
/// Accepts `{"data": [...]}`, a map keyed by symbol, or the flat object
/// returned for a single symbol.
pub fn parse_quotes(body: &Value, wanted: &[String]) -> Result<Vec<Ticker>, ProviderError> {
    check_error(body)?;
    let mut rows: HashMap<String, &Value> = HashMap::new();
    if let Some(items) = body.get("data").and_then(Value::as_array) {
        for item in items {
            if let Some(symbol) = item.get("symbol") {
                rows.insert(code_of(symbol), item);
            }
        }
    } else if let Some(symbol) = body.get("symbol") {
        rows.insert(code_of(symbol), body);
    } else if let Some(map) = body.as_object() {
        for (symbol, row) in map.iter().filter(|(_, row)| row.is_object()) {
            rows.insert(symbol.trim().to_ascii_uppercase(), row);
        }
    }

    Ok(wanted
        .iter()
        .map(|symbol| match rows.get(symbol) {
            Some(row) => quote_ticker(symbol, row),
            None => Ticker {
                symbol: symbol.clone(),
                ..Ticker::default()
            },
        })
        .collect())
}

pub struct TwelvedataSource {
    http: HttpClient,
    base_url: String,
    api_key: String,
    known: Mutex<Vec<String>>,
}

impl TwelvedataSource {
    pub fn new(http: HttpClient, api_key: String) -> Self {
        Self {
            http,
            base_url: BASE_URL.to_string(),
            api_key,
            known: Mutex::new(Vec::new()),
        }
    }

    async fn forex_pairs(&self, timeout: Duration) -> Result<Vec<MarketPair>, ProviderError> {
        let request = self
            .http
            .get(&format!("{}/forex_pairs", self.base_url))
            .query(&[("apikey", self.api_key.as_str())]);
        let pairs = parse_forex_pairs(&self.http.send_json(request, timeout).await?)?;
        if let Ok(mut known) = self.known.lock() {
            *known = pairs.iter().map(|p| p.symbol.clone()).collect();
        }
        Ok(pairs)
    }
}

#[async_trait]
impl QuoteSource for TwelvedataSource {
    fn provider(&self) -> Provider {
        Provider::Twelvedata
    }

    async fn symbols(&self, timeout: Duration) -> Result<Vec<MarketPair>, ProviderError> {
        self.forex_pairs(timeout).await
    }

    async fn tickers(&self, timeout: Duration) -> Result<Vec<Ticker>, ProviderError> {
        let cached = self.known.lock().map(|k| k.clone()).unwrap_or_default();
        let symbols = if cached.is_empty() {
            self.forex_pairs(timeout)
                .await?
                .into_iter()
                .map(|p| p.symbol)
                .collect()
        } else {
            cached
        };

        let mut tickers = Vec::with_capacity(symbols.len());
        for batch in symbols.chunks(QUOTE_BATCH) {
            let request = self
                .http
                .get(&format!("{}/quote", self.base_url))
                .query(&[("symbol", batch.join(",").as_str()), ("apikey", self.api_key.as_str())]);
            let body = self.http.send_json(request, timeout).await?;
            tickers.extend(parse_quotes(&body, batch)?);
        }
        Ok(tickers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn wanted(symbols: &[&str]) -> Vec<String> {
        symbols.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_forex_pairs() {
        let body = json!({
            "data": [
                {"symbol": "EUR/USD", "currency_base": "Euro"},
                {"symbol": "usd/rub"},
                {"symbol": "BROKEN"},
                {"name": "no symbol"}
            ],
            "status": "ok"
        });
        let pairs = parse_forex_pairs(&body).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1].symbol, "USD/RUB");
        assert_eq!(pairs[1].base, "USD");
        assert_eq!(pairs[1].quote, "RUB");

        assert!(matches!(
            parse_forex_pairs(&json!({"data": []})),
            Err(ProviderError::Parse(_))
        ));
        assert!(matches!(
            parse_forex_pairs(&json!({"code": 401, "message": "bad key", "status": "error"})),
            Err(ProviderError::Api(_))
        ));
    }

    #[test]
    fn test_quotes_keyed_by_symbol_with_fallback() {
        let body = json!({
            "EUR/USD": {"symbol": "EUR/USD", "bid": "1.0841", "ask": "1.0843", "close": "1.0842"},
            "USD/RUB": {"symbol": "USD/RUB", "close": "92.5"},
            "USD/TRY": {"symbol": "USD/TRY", "bid": "0", "ask": "", "rate": 32.1},
            "USD/XXX": {"code": 400, "status": "error"}
        });
        let tickers =
            parse_quotes(&body, &wanted(&["EUR/USD", "USD/RUB", "USD/TRY", "USD/XXX", "USD/JPY"]))
                .unwrap();
        assert_eq!(tickers.len(), 5);

        assert_eq!(tickers[0].bid, Some(dec!(1.0841)));
        assert_eq!(tickers[0].ask, Some(dec!(1.0843)));
        assert!(!tickers[0].synthetic);

        assert_eq!(tickers[1].bid, Some(dec!(92.5)));
        assert_eq!(tickers[1].ask, Some(dec!(92.5)));
        assert_eq!(tickers[1].last, Some(dec!(92.5)));
        assert!(tickers[1].synthetic);

        assert_eq!(tickers[2].bid, Some(dec!(32.1)));
        assert!(tickers[2].synthetic);

        assert_eq!(tickers[3].bid, None);
        assert_eq!(tickers[4].symbol, "USD/JPY");
        assert_eq!(tickers[4].ask, None);
    }

    #[test]
    fn test_quotes_data_list_and_single_symbol() {
        let list = json!({"data": [{"symbol": "EUR/USD", "price": "1.08"}]});
        let tickers = parse_quotes(&list, &wanted(&["EUR/USD"])).unwrap();
        assert_eq!(tickers[0].bid, Some(dec!(1.08)));
        assert!(tickers[0].synthetic);

        let single = json!({"symbol": "GBP/USD", "bid": "1.27", "ask": "1.28"});
        let tickers = parse_quotes(&single, &wanted(&["GBP/USD"])).unwrap();
        assert_eq!(tickers[0].ask, Some(dec!(1.28)));
    }
}
