//! Bybit wallet adapter (signed `coin/query-info`).

use crate::http::HttpClient;
use crate::signing::bybit_signature;
use crate::{chainless_row, confirmations, decode_entries, first_int, first_text, precision, text};
use async_trait::async_trait;
use chrono::Utc;
use marketsync_core::numeric::{norm_code, parse_bool, parse_decimal, parse_int, ratio_to_percent};
use marketsync_core::{Credentials, Provider, ProviderAdapter, ProviderError, ProviderRow};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

pub const BASE_URL: &str = "https://api.bybit.com";
const COIN_INFO_PATH: &str = "/v5/asset/coin/query-info";
pub const DEFAULT_RECV_WINDOW_MS: u64 = 5_000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    ret_code: Value,
    #[serde(default)]
    ret_msg: Value,
    #[serde(default)]
    result: Option<EnvelopeResult>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeResult {
    #[serde(default)]
    rows: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Coin {
    #[serde(default)]
    coin: String,
    #[serde(default)]
    name: Value,
    #[serde(default)]
    remain_amount: Value,
    #[serde(default)]
    chains: Option<Vec<Chain>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Chain {
    #[serde(default)]
    chain: Value,
    #[serde(default)]
    chain_type: Value,
    #[serde(default)]
    chain_deposit: Value,
    #[serde(default)]
    chain_withdraw: Value,
    #[serde(default)]
    confirmation: Value,
    #[serde(default)]
    safe_confirm_number: Value,
    #[serde(default)]
    deposit_min: Value,
    #[serde(default)]
    withdraw_min: Value,
    #[serde(default)]
    withdraw_fee: Value,
    #[serde(default)]
    withdraw_percentage_fee: Value,
    #[serde(default)]
    min_accuracy: Value,
}

pub struct BybitAdapter {
    http: HttpClient,
    credentials: Credentials,
    recv_window_ms: u64,
    base_url: String,
}

impl BybitAdapter {
    pub fn new(http: HttpClient, credentials: Credentials, recv_window_ms: Option<u64>) -> Self {
        Self {
            http,
            credentials,
            recv_window_ms: recv_window_ms.unwrap_or(DEFAULT_RECV_WINDOW_MS),
            base_url: BASE_URL.to_string(),
        }
    }
}

/// A missing, empty or zero withdraw fee means Bybit has withdrawals closed.
fn fee_missing(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty() || parse_decimal(value).is_zero(),
        _ => parse_decimal(value).is_zero(),
    }
}

#[async_trait]
impl ProviderAdapter for BybitAdapter {
    fn provider(&self) -> Provider {
        Provider::Bybit
    }

    async fn fetch_payload(&self, timeout: Duration) -> Result<Value, ProviderError> {
        let timestamp = Utc::now().timestamp_millis();
        let signature = bybit_signature(
            &self.credentials.api_secret,
            timestamp,
            &self.credentials.api_key,
            self.recv_window_ms,
            "",
        )?;

        let request = self
            .http
            .get(&format!("{}{}", self.base_url, COIN_INFO_PATH))
            .header("X-BAPI-API-KEY", &self.credentials.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", self.recv_window_ms.to_string())
            .header("X-BAPI-SIGN", signature)
            .header("X-BAPI-SIGN-TYPE", "2");

        let body = self.http.send_json(request, timeout).await?;
        let envelope: Envelope = serde_json::from_value(body)?;
        let code = parse_int(&envelope.ret_code);
        if code != 0 || envelope.ret_code.is_null() {
            return Err(ProviderError::Api(format!(
                "Bybit retCode={} retMsg={}",
                text(&envelope.ret_code),
                text(&envelope.ret_msg)
            )));
        }

        match envelope.result.map(|r| r.rows) {
            Some(Value::Array(rows)) => Ok(Value::Array(rows)),
            _ => Ok(json!([])),
        }
    }

    fn iter_rows(&self, payload: &Value) -> Result<Vec<ProviderRow>, ProviderError> {
        let mut rows = Vec::new();

        for (coin, raw) in decode_entries::<Coin>("bybit", payload)? {
            let code = norm_code(&coin.coin);
            if code.is_empty() {
                continue;
            }
            let name = first_text(&[&coin.name]);
            let name = if name.is_empty() { code.clone() } else { name };
            let remain = parse_decimal(&coin.remain_amount).max(Decimal::ZERO);
            let meta = json!({ "coin": raw });

            let chains = coin.chains.unwrap_or_default();
            if chains.is_empty() {
                let mut row = chainless_row(&code, &name, meta);
                row.withdraw_max = remain;
                rows.push(row);
                continue;
            }

            for chain in chains {
                let chain_code = norm_code(&text(&chain.chain));
                let chain_code = if chain_code.is_empty() {
                    "NATIVE".to_string()
                } else {
                    chain_code
                };
                let chain_display = first_text(&[&chain.chain_type]);
                let dep_conf = parse_int(&chain.confirmation);

                let mut row = ProviderRow::new(code.clone(), chain_code.clone());
                row.asset_name = name.clone();
                row.chain_name = if chain_display.is_empty() {
                    chain_code
                } else {
                    chain_display
                };
                row.deposit_enabled = parse_bool(&[&chain.chain_deposit]);
                row.withdraw_enabled =
                    parse_bool(&[&chain.chain_withdraw]) && !fee_missing(&chain.withdraw_fee);
                row.confirmations_deposit = confirmations(dep_conf);
                row.confirmations_withdraw =
                    confirmations(first_int(&[&chain.safe_confirm_number], dep_conf));
                row.deposit_min = parse_decimal(&chain.deposit_min);
                row.withdraw_min = parse_decimal(&chain.withdraw_min);
                row.withdraw_max = remain;
                row.withdraw_fee_fixed = parse_decimal(&chain.withdraw_fee);
                row.withdraw_fee_percent =
                    ratio_to_percent(parse_decimal(&chain.withdraw_percentage_fee));
                row.amount_precision = precision(first_int(&[&chain.min_accuracy], 8));
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

    fn adapter() -> BybitAdapter {
        BybitAdapter::new(
            HttpClient::new().unwrap(),
            Credentials {
                api_key: "k".into(),
                api_secret: "s".into(),
            },
            None,
        )
    }

    #[test]
    fn test_maps_chain_fields() {
        let payload = json!([{
            "name": "Tether USDT",
            "coin": "USDT",
            "remainAmount": "5000000",
            "chains": [{
                "chainType": "TRC20",
                "confirmation": "10",
                "withdrawFee": "1",
                "depositMin": "0",
                "withdrawMin": "10",
                "chain": "TRX",
                "chainDeposit": "1",
                "chainWithdraw": "1",
                "minAccuracy": "6",
                "withdrawPercentageFee": "0.0005",
                "safeConfirmNumber": "19"
            }]
        }]);

        let rows = adapter().iter_rows(&payload).unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.chain_code, "TRX");
        assert_eq!(row.chain_name, "TRC20");
        assert!(row.deposit_enabled && row.withdraw_enabled);
        assert_eq!(row.confirmations_deposit, 10);
        assert_eq!(row.confirmations_withdraw, 19);
        assert_eq!(row.withdraw_max, dec!(5000000));
        assert_eq!(row.withdraw_fee_percent, dec!(0.05));
        assert_eq!(row.amount_precision, 6);
    }

    #[test]
    fn test_missing_withdraw_fee_closes_withdrawals() {
        let payload = json!([{
            "coin": "ABC",
            "chains": [
                {"chain": "ETH", "chainDeposit": "1", "chainWithdraw": "1", "withdrawFee": ""},
                {"chain": "BSC", "chainDeposit": "1", "chainWithdraw": "1"},
                {"chain": "SOL", "chainDeposit": "1", "chainWithdraw": "1", "withdrawFee": "0"}
            ]
        }]);
        let rows = adapter().iter_rows(&payload).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.deposit_enabled && !r.withdraw_enabled));
    }
}
