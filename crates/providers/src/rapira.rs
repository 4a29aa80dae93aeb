//! Rapira wallet adapter.
//!
//! `/open/token` carries no confirmation counts, so rows are only emitted for
//! `(coin, chain)` pairs present in the configured override table. A synthetic
//! RUB fiat row is always appended.

use crate::http::HttpClient;
use crate::{confirmations, decode_entries, first_int, first_text, precision, text};
use async_trait::async_trait;
use marketsync_core::numeric::{norm_code, parse_bool, parse_decimal};
use marketsync_core::{Provider, ProviderAdapter, ProviderError, ProviderRow};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

pub const BASE_URL: &str = "https://api.rapira.net";
const TOKEN_PATH: &str = "/open/token";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Token {
    #[serde(default)]
    coin_id: Value,
    #[serde(default)]
    chain_id: Value,
    #[serde(default)]
    display_name: Value,
    #[serde(default)]
    rechargeable: Value,
    #[serde(default)]
    withdrawable: Value,
    #[serde(default)]
    min_recharge: Value,
    #[serde(default)]
    min_withdraw: Value,
    #[serde(default)]
    scale: Value,
    #[serde(default)]
    recharge_fee: Value,
    #[serde(default)]
    withdraw_fee: Value,
}

pub struct RapiraAdapter {
    http: HttpClient,
    base_url: String,
    overrides: HashMap<(String, String), i32>,
}

impl RapiraAdapter {
    /// `overrides` is keyed `"COIN:CHAIN"`; malformed keys are ignored.
    pub fn new(http: HttpClient, overrides: &HashMap<String, i32>) -> Self {
        let overrides = overrides
            .iter()
            .filter_map(|(key, conf)| {
                let (coin, chain) = key.split_once(':')?;
                Some(((norm_code(coin), norm_code(chain)), *conf))
            })
            .collect();
        Self {
            http,
            base_url: BASE_URL.to_string(),
            overrides,
        }
    }
}

fn rub_row() -> ProviderRow {
    let mut row = ProviderRow::new("RUB", "");
    row.asset_name = "Russian Ruble".to_string();
    row.amount_precision = 2;
    row.raw_meta = json!({ "synthetic": true });
    row
}

#[async_trait]
impl ProviderAdapter for RapiraAdapter {
    fn provider(&self) -> Provider {
        Provider::Rapira
    }

    async fn fetch_payload(&self, timeout: Duration) -> Result<Value, ProviderError> {
        let body = self
            .http
            .get_json(&format!("{}{}", self.base_url, TOKEN_PATH), timeout)
            .await?;
        match body {
            Value::Array(items) => Ok(Value::Array(items)),
            _ => Err(ProviderError::Api("Rapira token list is not an array".into())),
        }
    }

    fn iter_rows(&self, payload: &Value) -> Result<Vec<ProviderRow>, ProviderError> {
        let mut rows = Vec::new();

        for (token, raw) in decode_entries::<Token>("rapira", payload)? {
            let coin = norm_code(&text(&token.coin_id));
            let chain = norm_code(&text(&token.chain_id));
            if coin.is_empty() || chain.is_empty() {
                continue;
            }
            let Some(conf) = self.overrides.get(&(coin.clone(), chain.clone())) else {
                tracing::debug!(coin = %coin, chain = %chain, "No confirmation override, skipping");
                continue;
            };
            let display = first_text(&[&token.display_name]);

            let mut row = ProviderRow::new(coin.clone(), chain.clone());
            row.asset_name = coin;
            row.chain_name = if display.is_empty() { chain } else { display };
            row.deposit_enabled = parse_bool(&[&token.rechargeable]);
            row.withdraw_enabled = parse_bool(&[&token.withdrawable]);
            row.confirmations_deposit = confirmations(i64::from(*conf));
            row.confirmations_withdraw = confirmations(i64::from(*conf));
            row.deposit_min = parse_decimal(&token.min_recharge);
            row.withdraw_min = parse_decimal(&token.min_withdraw);
            row.deposit_fee_fixed = parse_decimal(&token.recharge_fee);
            row.withdraw_fee_fixed = parse_decimal(&token.withdraw_fee);
            row.amount_precision = precision(first_int(&[&token.scale], 8));
            row.raw_meta = raw.clone();
            rows.push(row);
        }

        rows.push(rub_row());
        Ok(rows)
    }

    fn writes_withdraw_max(&self) -> bool {
        false
    }
}
