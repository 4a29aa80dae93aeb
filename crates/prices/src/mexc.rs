use crate::source::{QuoteSource, Ticker};
use crate::{code_of, decode_items, price_of};
use async_trait::async_trait;
use marketsync_core::{MarketPair, Provider, ProviderError};
use marketsync_providers::HttpClient;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

pub const BASE_URL: &str = "https://api.mexc.com";

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    #[serde(default)]
    symbols: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Symbol {
    #[serde(default)]
    symbol: Value,
    #[serde(default)]
    base_asset: Value,
    #[serde(default)]
    quote_asset: Value,
    #[serde(default)]
    status: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookTicker {
    #[serde(default)]
    symbol: Value,
    #[serde(default)]
    bid_price: Value,
    #[serde(default)]
    ask_price: Value,
}

#[derive(Debug, Deserialize)]
struct LastPrice {
    #[serde(default)]
    symbol: Value,
    #[serde(default)]
    price: Value,
}

/// Only explicitly halted symbols are dropped; a missing status is tradable.
fn is_tradable(status: &Value) -> bool {
    match status {
        Value::String(s) => {
            let s = s.trim();
            s.is_empty() || matches!(s.to_ascii_uppercase().as_str(), "1" | "ENABLED" | "ONLINE" | "TRADING")
        }
        Value::Number(n) => n.as_i64() == Some(1),
        _ => true,
    }
}

fn as_list(body: Value, what: &str) -> Result<Vec<Value>, ProviderError> {
    match body {
        Value::Array(items) => Ok(items),
        _ => Err(ProviderError::Parse(format!("MEXC {what}: expected a list"))),
    }
}

pub fn parse_symbols(body: Value) -> Result<Vec<MarketPair>, ProviderError> {
    let info: ExchangeInfo = serde_json::from_value(body)?;
    Ok(decode_items::<Symbol>("mexc", &info.symbols)
        .into_iter()
        .filter(|s| is_tradable(&s.status))
        .map(|s| MarketPair {
            symbol: code_of(&s.symbol),
            base: code_of(&s.base_asset),
            quote: code_of(&s.quote_asset),
        })
        .filter(|p| !p.symbol.is_empty() && !p.base.is_empty() && !p.quote.is_empty())
        .collect())
}

/// Join book tickers with last prices by symbol.
pub fn parse_tickers(books: Value, prices: Value) -> Result<Vec<Ticker>, ProviderError> {
    let last: HashMap<String, Decimal> = decode_items::<LastPrice>("mexc", &as_list(prices, "prices")?)
        .into_iter()
        .filter_map(|p| Some((code_of(&p.symbol), price_of(&p.price)?)))
        .collect();

    Ok(decode_items::<BookTicker>("mexc", &as_list(books, "book tickers")?)
        .into_iter()
        .map(|b| {
            let symbol = code_of(&b.symbol);
            Ticker {
                bid: price_of(&b.bid_price),
                ask: price_of(&b.ask_price),
                last: last.get(&symbol).copied(),
                ts_ms: None,
                symbol,
                ..Ticker::default()
            }
        })
        .filter(|t| !t.symbol.is_empty())
        .collect())
}

pub struct MexcSource {
    http: HttpClient,
    base_url: String,
}

impl MexcSource {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            base_url: BASE_URL.to_string(),
        }
    }
}

#[async_trait]
impl QuoteSource for MexcSource {
    fn provider(&self) -> Provider {
        Provider::Mexc
    }

    async fn symbols(&self, timeout: Duration) -> Result<Vec<MarketPair>, ProviderError> {
        let url = format!("{}/api/v3/exchangeInfo", self.base_url);
        parse_symbols(self.http.get_json(&url, timeout).await?)
    }

    async fn tickers(&self, timeout: Duration) -> Result<Vec<Ticker>, ProviderError> {
        let books = self
            .http
            .get_json(&format!("{}/api/v3/ticker/bookTicker", self.base_url), timeout)
            .await?;
        // Last prices are optional decoration.
        let prices = match self
            .http
            .get_json(&format!("{}/api/v3/ticker/price", self.base_url), timeout)
            .await
        {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(error = %e, "MEXC last prices unavailable");
                Value::Array(Vec::new())
            }
        };
        parse_tickers(books, prices)
    }
}
