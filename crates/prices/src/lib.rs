//! L1 quote pipeline.
//!
//! Collectors poll all-tickers endpoints and publish every sane quote to a
//! hot key plus a capped stream. The sampler drains the stream through a
//! consumer group and persists only significant points.

pub mod bybit;
pub mod collector;
pub mod htx;
pub mod kucoin;
pub mod mexc;
pub mod openexchangerates;
pub mod publisher;
pub mod rapira;
pub mod sampler;
pub mod source;
pub mod twelvedata;
pub mod whitebit;

pub use collector::{CollectStats, Collector, SymbolCache};
pub use publisher::{Publisher, QuoteEvent};
pub use sampler::{SampleStats, Sampler};
pub use source::{build_source, QuoteSource, Ticker};

use marketsync_cache::StoreError;
use marketsync_core::numeric::parse_price;
use marketsync_core::{ProviderError, RepoError};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("Coordination store: {0}")]
    Store(#[from] StoreError),
    #[error("Repository: {0}")]
    Repo(#[from] RepoError),
    #[error("Malformed quote event: {0}")]
    Event(String),
}

/// A ticker price field: string or number. Anything else is missing.
pub(crate) fn price_of(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => parse_price(s),
        Value::Number(n) => parse_price(&n.to_string()),
        _ => None,
    }
}

/// Epoch milliseconds from a string or number field; zero and junk are `None`.
pub(crate) fn millis_of(value: &Value) -> Option<i64> {
    let ms = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }?;
    (ms > 0).then_some(ms)
}

/// Decode every element that fits `T`, dropping the rest.
pub(crate) fn decode_items<T: DeserializeOwned>(source: &str, items: &[Value]) -> Vec<T> {
    items
        .iter()
        .filter_map(|item| match T::deserialize(item) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                tracing::debug!(source, error = %e, "Dropping malformed market entry");
                None
            }
        })
        .collect()
}

/// Upper-cased text of a field.
pub(crate) fn code_of(value: &Value) -> String {
    value.as_str().map(|s| s.trim().to_ascii_uppercase()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_price_fields() {
        assert_eq!(price_of(&json!("65000.5")), Some(dec!(65000.5)));
        assert_eq!(price_of(&json!(0.25)), Some(dec!(0.25)));
        assert_eq!(price_of(&json!("")), None);
        assert_eq!(price_of(&Value::Null), None);

        assert_eq!(millis_of(&json!("1700000000000")), Some(1_700_000_000_000));
        assert_eq!(millis_of(&json!(0)), None);
        assert_eq!(code_of(&json!(" btc ")), "BTC");
    }
}
