//! KuCoin wallet adapter (public currencies endpoint).

use crate::http::HttpClient;
use crate::{chainless_row, confirmations, decode_entries, first_int, first_text, precision, text};
use async_trait::async_trait;
use marketsync_core::numeric::{norm_code, parse_bool, parse_decimal, parse_int, ratio_to_percent};
use marketsync_core::{Provider, ProviderAdapter, ProviderError, ProviderRow};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

pub const BASE_URL: &str = "https://api.kucoin.com";
const CURRENCIES_PATH: &str = "/api/v3/currencies";
const SUCCESS_CODE: &str = "200000";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    code: Value,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Currency {
    #[serde(default)]
    currency: String,
    #[serde(default)]
    full_name: Value,
    #[serde(default)]
    precision: Value,
    #[serde(default)]
    chains: Option<Vec<Chain>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Chain {
    #[serde(default)]
    chain_id: Value,
    #[serde(default)]
    chain_name: Value,
    #[serde(default)]
    is_deposit_enabled: Value,
    #[serde(default)]
    is_withdraw_enabled: Value,
    #[serde(default)]
    pre_confirms: Value,
    #[serde(default)]
    confirms: Value,
    #[serde(default)]
    deposit_min_size: Value,
    #[serde(default)]
    max_deposit: Value,
    #[serde(default)]
    withdrawal_min_size: Value,
    #[serde(default)]
    max_withdraw: Value,
    #[serde(default)]
    withdrawal_min_fee: Value,
    #[serde(default)]
    withdraw_fee_rate: Value,
    #[serde(default)]
    withdraw_precision: Value,
    #[serde(default)]
    need_tag: Value,
}

pub struct KucoinAdapter {
    http: HttpClient,
    base_url: String,
}

impl KucoinAdapter {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            base_url: BASE_URL.to_string(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for KucoinAdapter {
    fn provider(&self) -> Provider {
        Provider::Kucoin
    }

    async fn fetch_payload(&self, timeout: Duration) -> Result<Value, ProviderError> {
        let url = format!("{}{}", self.base_url, CURRENCIES_PATH);
        let body = self.http.get_json(&url, timeout).await?;
        let envelope: Envelope = serde_json::from_value(body)?;
        if text(&envelope.code) != SUCCESS_CODE {
            return Err(ProviderError::Api(format!(
                "KuCoin code={} msg={}",
                text(&envelope.code),
                envelope.msg.unwrap_or_default()
            )));
        }
        match envelope.data {
            Value::Array(items) => Ok(Value::Array(items)),
            _ => Ok(json!([])),
        }
    }

    fn iter_rows(&self, payload: &Value) -> Result<Vec<ProviderRow>, ProviderError> {
        let mut rows = Vec::new();

        for (item, raw) in decode_entries::<Currency>("kucoin", payload)? {
            let code = norm_code(&item.currency);
            if code.is_empty() {
                continue;
            }
            let name = first_text(&[&item.full_name]);
            let name = if name.is_empty() { code.clone() } else { name };
            let root_precision = first_int(&[&item.precision], 8);
            let meta = json!({ "asset": raw });

            let chains = item.chains.unwrap_or_default();
            if chains.is_empty() {
                let mut row = chainless_row(&code, &name, meta);
                row.amount_precision = precision(root_precision);
                rows.push(row);
                continue;
            }

            for chain in chains {
                let chain_code = norm_code(&first_text(&[&chain.chain_id, &chain.chain_name]));
                let chain_code = if chain_code.is_empty() {
                    "NATIVE".to_string()
                } else {
                    chain_code
                };
                let chain_name = first_text(&[&chain.chain_name]);

                let dep_conf = parse_int(&chain.pre_confirms);
                let wd_conf = first_int(&[&chain.confirms], dep_conf);

                let mut row = ProviderRow::new(code.clone(), chain_code.clone());
                row.asset_name = name.clone();
                row.chain_name = if chain_name.is_empty() { chain_code } else { chain_name };
                row.deposit_enabled = parse_bool(&[&chain.is_deposit_enabled]);
                row.withdraw_enabled = parse_bool(&[&chain.is_withdraw_enabled]);
                row.confirmations_deposit = confirmations(dep_conf);
                row.confirmations_withdraw = confirmations(wd_conf);
                row.deposit_min = parse_decimal(&chain.deposit_min_size);
                row.deposit_max = parse_decimal(&chain.max_deposit);
                row.withdraw_min = parse_decimal(&chain.withdrawal_min_size);
                row.withdraw_max = parse_decimal(&chain.max_withdraw);
                row.withdraw_fee_fixed = parse_decimal(&chain.withdrawal_min_fee);
                row.withdraw_fee_percent = ratio_to_percent(parse_decimal(&chain.withdraw_fee_rate));
                row.amount_precision =
                    precision(first_int(&[&chain.withdraw_precision], root_precision));
                row.requires_memo = parse_bool(&[&chain.need_tag]);
                row.raw_meta = meta.clone();
                rows.push(row);
            }
        }

        Ok(rows)
    }
}
