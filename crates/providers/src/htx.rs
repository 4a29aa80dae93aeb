//! HTX (ex-Huobi) wallet adapter.
//!
//! The reference endpoint is served from several hosts; they are tried in
//! order until one returns a non-empty list.

use crate::http::HttpClient;
use crate::{chainless_row, confirmations, decode_entries, first_int, first_text, precision, text};
use async_trait::async_trait;
use marketsync_core::numeric::{norm_code, parse_bool, parse_decimal, parse_int, ratio_to_percent};
use marketsync_core::{Provider, ProviderAdapter, ProviderError, ProviderRow};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

pub const BASE_URLS: [&str; 3] = [
    "https://api.htx.com",
    "https://api.huobi.pro",
    "https://api.huobi.com",
];
const CURRENCIES_PATH: &str = "/v2/reference/currencies";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct Currency {
    #[serde(default)]
    currency: String,
    #[serde(default)]
    chains: Option<Vec<Chain>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Chain {
    #[serde(default)]
    chain: Value,
    #[serde(default)]
    base_chain: Value,
    #[serde(default)]
    display_name: Value,
    #[serde(default)]
    deposit_status: Value,
    #[serde(default)]
    withdraw_status: Value,
    #[serde(default)]
    num_of_fast_confirmations: Value,
    #[serde(default)]
    num_of_confirmations: Value,
    #[serde(default)]
    min_deposit_amt: Value,
    #[serde(default)]
    min_withdraw_amt: Value,
    #[serde(default)]
    max_withdraw_amt: Value,
    #[serde(default)]
    withdraw_fee_type: Value,
    #[serde(default)]
    transact_fee_withdraw: Value,
    #[serde(default)]
    min_transact_fee_withdraw: Value,
    #[serde(default)]
    transact_fee_rate_withdraw: Value,
    #[serde(default)]
    addr_deposit_tag: Value,
    #[serde(default)]
    withdraw_precision: Value,
}

pub struct HtxAdapter {
    http: HttpClient,
    base_urls: Vec<String>,
}

impl HtxAdapter {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            base_urls: BASE_URLS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for HtxAdapter {
    fn provider(&self) -> Provider {
        Provider::Htx
    }

    async fn fetch_payload(&self, timeout: Duration) -> Result<Value, ProviderError> {
        let mut last_error = None;

        for base in &self.base_urls {
            let url = format!("{base}{CURRENCIES_PATH}");
            match self.http.get_json(&url, timeout).await {
                Ok(body) => {
                    let envelope: Envelope = serde_json::from_value(body)?;
                    match envelope.data {
                        Value::Array(items) if !items.is_empty() => return Ok(Value::Array(items)),
                        _ => tracing::warn!(url = %url, "HTX host returned no currencies"),
                    }
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "HTX host failed, trying next");
                    last_error = Some(e);
                }
            }
        }

        // An empty list would reconcile every asset away; treat it as a failure.
        Err(last_error
            .unwrap_or_else(|| ProviderError::Api("HTX returned an empty currency list".into())))
    }

    fn iter_rows(&self, payload: &Value) -> Result<Vec<ProviderRow>, ProviderError> {
        let mut rows = Vec::new();

        for (item, raw) in decode_entries::<Currency>("htx", payload)? {
            let code = norm_code(&item.currency);
            if code.is_empty() {
                continue;
            }
            let meta = json!({ "asset": raw });

            let chains = item.chains.unwrap_or_default();
            if chains.is_empty() {
                rows.push(chainless_row(&code, &code, meta));
                continue;
            }

            for chain in chains {
                let chain_code = norm_code(&first_text(&[&chain.chain, &chain.base_chain]));
                let chain_code = if chain_code.is_empty() {
                    "NATIVE".to_string()
                } else {
                    chain_code
                };
                let chain_name = first_text(&[&chain.display_name]);
                let dep_conf = parse_int(&chain.num_of_fast_confirmations);

                let fee_type = text(&chain.withdraw_fee_type).to_ascii_lowercase();
                let (fee_fixed, fee_percent) = match fee_type.as_str() {
                    "ratio" => (
                        parse_decimal(&chain.min_transact_fee_withdraw),
                        ratio_to_percent(parse_decimal(&chain.transact_fee_rate_withdraw)),
                    ),
                    "circulated" => (
                        parse_decimal(&chain.min_transact_fee_withdraw),
                        rust_decimal::Decimal::ZERO,
                    ),
                    _ => (
                        parse_decimal(&chain.transact_fee_withdraw),
                        rust_decimal::Decimal::ZERO,
                    ),
                };

                let mut row = ProviderRow::new(code.clone(), chain_code.clone());
                row.asset_name = code.clone();
                row.chain_name = if chain_name.is_empty() { chain_code } else { chain_name };
                row.deposit_enabled = parse_bool(&[&chain.deposit_status]);
                row.withdraw_enabled = parse_bool(&[&chain.withdraw_status]);
                row.confirmations_deposit = confirmations(dep_conf);
                row.confirmations_withdraw =
                    confirmations(first_int(&[&chain.num_of_confirmations], dep_conf));
                row.deposit_min = parse_decimal(&chain.min_deposit_amt);
                row.withdraw_min = parse_decimal(&chain.min_withdraw_amt);
                row.withdraw_max = parse_decimal(&chain.max_withdraw_amt);
                row.withdraw_fee_fixed = fee_fixed;
                row.withdraw_fee_percent = fee_percent;
                row.requires_memo = parse_bool(&[&chain.addr_deposit_tag]);
                row.amount_precision = precision(first_int(&[&chain.withdraw_precision], 8));
                row.raw_meta = meta.clone();
                rows.push(row);
            }
        }

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn adapter() -> HtxAdapter {
        HtxAdapter::new(HttpClient::new().unwrap())
    }

    #[test]
    fn test_fee_types() {
        let payload = json!([{
            "currency": "usdt",
            "chains": [{
                "chain": "trc20usdt",
                "displayName": "TRC20",
                "depositStatus": "allowed",
                "withdrawStatus": "prohibited",
                "numOfFastConfirmations": 1,
                "numOfConfirmations": 20,
                "minWithdrawAmt": "10",
                "maxWithdrawAmt": "1000000",
                "withdrawFeeType": "fixed",
                "transactFeeWithdraw": "1",
                "addrDepositTag": false,
                "withdrawPrecision": 6
            }, {
                "chain": "usdterc20",
                "withdrawFeeType": "ratio",
                "minTransactFeeWithdraw": "5",
                "transactFeeRateWithdraw": "0.002",
                "depositStatus": "allowed",
                "withdrawStatus": "allowed"
            }]
        }]);

        let rows = adapter().iter_rows(&payload).unwrap();
        assert_eq!(rows.len(), 2);

        let trc = &rows[0];
        assert_eq!(trc.chain_code, "TRC20USDT");
        assert_eq!(trc.chain_name, "TRC20");
        assert!(trc.deposit_enabled);
        assert!(!trc.withdraw_enabled);
        assert_eq!(trc.confirmations_withdraw, 20);
        assert_eq!(trc.withdraw_fee_fixed, dec!(1));

        let erc = &rows[1];
        assert_eq!(erc.withdraw_fee_fixed, dec!(5));
        assert_eq!(erc.withdraw_fee_percent, dec!(0.2));
        assert!(erc.withdraw_enabled);
    }
}
