//! Provider adapters.
//!
//! Each adapter fetches one exchange's wallet/asset configuration and maps it
//! to [`ProviderRow`]s. Adapters are pure fetch-and-transform: retries,
//! locking and persistence belong to the sync engine.

pub mod bybit;
pub mod cash;
pub mod htx;
pub mod http;
pub mod kucoin;
pub mod mexc;
pub mod rapira;
pub mod registry;
pub mod signing;
pub mod whitebit;

pub use http::HttpClient;
pub use registry::{build_adapter, AdapterContext, ProviderSpec};

use marketsync_core::{ProviderError, ProviderRow};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Decode each element of a JSON array, keeping the raw element alongside.
/// Elements that do not fit `T` are dropped.
pub(crate) fn decode_entries<'a, T: DeserializeOwned>(
    source: &str,
    payload: &'a Value,
) -> Result<Vec<(T, &'a Value)>, ProviderError> {
    let items = payload
        .as_array()
        .ok_or_else(|| ProviderError::Parse(format!("{source}: expected a JSON array")))?;

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match T::deserialize(item) {
            Ok(decoded) => out.push((decoded, item)),
            Err(e) => tracing::debug!(source, error = %e, "Dropping malformed entry"),
        }
    }
    Ok(out)
}

/// Display text of a loosely typed field: trimmed string or number, else empty.
pub(crate) fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

/// First non-empty text among candidate fields.
pub(crate) fn first_text(values: &[&Value]) -> String {
    values
        .iter()
        .map(|v| text(v))
        .find(|s| !s.is_empty())
        .unwrap_or_default()
}

/// First positive integer among candidate fields, else `default`.
pub(crate) fn first_int(values: &[&Value], default: i64) -> i64 {
    values
        .iter()
        .map(|v| marketsync_core::numeric::parse_int(v))
        .find(|n| *n > 0)
        .unwrap_or(default)
}

/// Row for a coin the provider lists without any network.
pub(crate) fn chainless_row(asset_code: &str, asset_name: &str, raw_meta: Value) -> ProviderRow {
    let mut row = ProviderRow::new(asset_code, "");
    row.asset_name = asset_name.to_string();
    row.raw_meta = raw_meta;
    row
}

fn clamp_i32(value: i64) -> i32 {
    value.clamp(0, i64::from(i32::MAX)) as i32
}

pub(crate) fn confirmations(value: i64) -> i32 {
    clamp_i32(value)
}

pub(crate) fn precision(value: i64) -> u32 {
    value.clamp(0, i64::from(marketsync_core::numeric::MAX_AMOUNT_PRECISION)) as u32
}
