//! MEXC wallet adapter (signed `capital/config/getall`).
//!
//! MEXC's withdraw maximums are unreliable, so this adapter never writes them.

use crate::http::HttpClient;
use crate::signing::mexc_signature;
use crate::{chainless_row, confirmations, decode_entries, first_int, first_text, precision, text};
use async_trait::async_trait;
use chrono::Utc;
use marketsync_core::numeric::{norm_code, parse_bool, parse_decimal};
use marketsync_core::{Credentials, Provider, ProviderAdapter, ProviderError, ProviderRow};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

pub const BASE_URL: &str = "https://api.mexc.com";
const CONFIG_PATH: &str = "/api/v3/capital/config/getall";
pub const DEFAULT_RECV_WINDOW_MS: u64 = 20_000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Coin {
    #[serde(default)]
    coin: Value,
    #[serde(default)]
    asset: Value,
    #[serde(default)]
    name: Value,
    #[serde(default)]
    full_name: Value,
    #[serde(default)]
    network_list: Option<Vec<Value>>,
    #[serde(default)]
    chains: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Network {
    #[serde(default)]
    network: Value,
    #[serde(default, rename = "netWork")]
    net_work: Value,
    #[serde(default)]
    chain: Value,
    #[serde(default)]
    name: Value,
    #[serde(default)]
    deposit_enable: Value,
    #[serde(default)]
    can_deposit: Value,
    #[serde(default)]
    withdraw_enable: Value,
    #[serde(default)]
    can_withdraw: Value,
    #[serde(default)]
    min_confirm: Value,
    #[serde(default)]
    confirm_times: Value,
    #[serde(default)]
    withdraw_confirm: Value,
    #[serde(default)]
    withdraw_confirm_times: Value,
    #[serde(default)]
    deposit_min: Value,
    #[serde(default)]
    deposit_max: Value,
    #[serde(default)]
    withdraw_min: Value,
    #[serde(default)]
    withdraw_fee: Value,
    #[serde(default)]
    withdraw_fee_percent: Value,
    #[serde(default)]
    deposit_fee: Value,
    #[serde(default)]
    deposit_fee_fixed: Value,
    #[serde(default)]
    deposit_fee_percent: Value,
    #[serde(default)]
    need_tag: Value,
    #[serde(default)]
    special_tips: Value,
    #[serde(default)]
    same_address: Value,
    #[serde(default)]
    withdraw_precision: Value,
    #[serde(default)]
    accuracy: Value,
}

pub struct MexcAdapter {
    http: HttpClient,
    credentials: Credentials,
    recv_window_ms: u64,
    base_url: String,
}

impl MexcAdapter {
    pub fn new(http: HttpClient, credentials: Credentials, recv_window_ms: Option<u64>) -> Self {
        Self {
            http,
            credentials,
            recv_window_ms: recv_window_ms.unwrap_or(DEFAULT_RECV_WINDOW_MS),
            base_url: BASE_URL.to_string(),
        }
    }
}

/// MEXC answers with a bare list or a wrapper around one.
fn unwrap_list(body: Value) -> Result<Value, ProviderError> {
    match body {
        Value::Array(items) => Ok(Value::Array(items)),
        Value::Object(mut map) => {
            for key in ["data", "result", "rows"] {
                if let Some(Value::Array(items)) = map.remove(key) {
                    return Ok(Value::Array(items));
                }
            }
            let code = map.get("code").cloned().unwrap_or(Value::Null);
            let ok = match &code {
                Value::Null => true,
                other => matches!(text(other).as_str(), "0" | "200"),
            };
            if !ok {
                let msg = first_text(&[
                    map.get("msg").unwrap_or(&Value::Null),
                    map.get("message").unwrap_or(&Value::Null),
                ]);
                return Err(ProviderError::Api(format!(
                    "MEXC code={} msg={msg}",
                    text(&code)
                )));
            }
            Ok(json!([]))
        }
        _ => Ok(json!([])),
    }
}

#[async_trait]
impl ProviderAdapter for MexcAdapter {
    fn provider(&self) -> Provider {
        Provider::Mexc
    }

    async fn fetch_payload(&self, timeout: Duration) -> Result<Value, ProviderError> {
        let query = format!(
            "timestamp={}&recvWindow={}",
            Utc::now().timestamp_millis(),
            self.recv_window_ms
        );
        let signature = mexc_signature(&self.credentials.api_secret, &query)?;
        let url = format!("{}{}?{query}&signature={signature}", self.base_url, CONFIG_PATH);

        let request = self
            .http
            .get(&url)
            .header("X-MEXC-APIKEY", &self.credentials.api_key);
        let body = self.http.send_json(request, timeout).await?;
        unwrap_list(body)
    }

    fn iter_rows(&self, payload: &Value) -> Result<Vec<ProviderRow>, ProviderError> {
        let mut rows = Vec::new();

        for (entry, raw) in decode_entries::<Coin>("mexc", payload)? {
            // Some responses nest the coin object under "coin".
            let (coin, root) = match raw.get("coin") {
                Some(nested @ Value::Object(_)) => match Coin::deserialize(nested) {
                    Ok(inner) => (inner, nested),
                    Err(_) => continue,
                },
                _ => (entry, raw),
            };

            let code = norm_code(&first_text(&[&coin.coin, &coin.asset]));
            if code.is_empty() {
                continue;
            }
            let name = first_text(&[&coin.name, &coin.full_name]);
            let name = if name.is_empty() { code.clone() } else { name };
            let meta = json!({ "coin": root });

            let networks = coin.network_list.or(coin.chains).unwrap_or_default();
            if networks.is_empty() {
                rows.push(chainless_row(&code, &name, meta));
                continue;
            }

            for raw_net in &networks {
                let Ok(net) = Network::deserialize(raw_net) else {
                    continue;
                };
                let chain_code =
                    norm_code(&first_text(&[&net.network, &net.net_work, &net.chain, &net.name]));
                if chain_code.is_empty() {
                    continue;
                }
                let chain_name = first_text(&[&net.name, &net.network]);

                let dep_conf = first_int(&[&net.min_confirm, &net.confirm_times], 0);
                let wd_conf = first_int(
                    &[&net.withdraw_confirm, &net.withdraw_confirm_times],
                    dep_conf,
                );

                let tips = text(&net.special_tips).to_lowercase();
                let requires_memo = parse_bool(&[&net.need_tag])
                    || tips.contains("memo")
                    || tips.contains("tag")
                    || parse_bool(&[&net.same_address]);

                let mut row = ProviderRow::new(code.clone(), chain_code.clone());
                row.asset_name = name.clone();
                row.chain_name = if chain_name.is_empty() { chain_code } else { chain_name };
                row.deposit_enabled = parse_bool(&[&net.deposit_enable, &net.can_deposit]);
                row.withdraw_enabled = parse_bool(&[&net.withdraw_enable, &net.can_withdraw]);
                row.confirmations_deposit = confirmations(dep_conf);
                row.confirmations_withdraw = confirmations(wd_conf);
                row.deposit_min = parse_decimal(&net.deposit_min);
                row.deposit_max = parse_decimal(&net.deposit_max);
                row.withdraw_min = parse_decimal(&net.withdraw_min);
                row.withdraw_fee_fixed = parse_decimal(&net.withdraw_fee);
                row.withdraw_fee_percent = parse_decimal(&net.withdraw_fee_percent);
                row.deposit_fee_fixed = if net.deposit_fee.is_null() {
                    parse_decimal(&net.deposit_fee_fixed)
                } else {
                    parse_decimal(&net.deposit_fee)
                };
                row.deposit_fee_percent = parse_decimal(&net.deposit_fee_percent);
                row.requires_memo = requires_memo;
                row.amount_precision =
                    precision(first_int(&[&net.withdraw_precision, &net.accuracy], 8));
                row.raw_meta = meta.clone();
                rows.push(row);
            }
        }

        Ok(rows)
    }

    fn writes_withdraw_max(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn adapter() -> MexcAdapter {
        MexcAdapter::new(
            HttpClient::new().unwrap(),
            Credentials {
                api_key: "k".into(),
                api_secret: "s".into(),
            },
            None,
        )
    }

    #[test]
    fn test_unwrap_variants() {
        assert_eq!(unwrap_list(json!([1])).unwrap(), json!([1]));
        assert_eq!(unwrap_list(json!({"data": [1, 2]})).unwrap(), json!([1, 2]));
        assert_eq!(unwrap_list(json!({"code": 0})).unwrap(), json!([]));
        assert!(unwrap_list(json!({"code": 700002, "msg": "Signature for this request is not valid."})).is_err());
    }

    #[test]
    fn test_maps_networks_and_memo_hints() {
        let payload = json!([{
            "coin": "XLM",
            "name": "Stellar",
            "networkList": [{
                "network": "Stellar",
                "netWork": "XLM",
                "depositEnable": true,
                "withdrawEnable": true,
                "minConfirm": 3,
                "withdrawFee": "0.01",
                "withdrawMin": "20",
                "withdrawMax": "9999999",
                "specialTips": "Please fill in the MEMO when depositing",
                "withdrawPrecision": "7"
            }, {
                "netWork": "",
                "name": ""
            }]
        }]);

        let mexc = adapter();
        let rows = mexc.iter_rows(&payload).unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.chain_code, "STELLAR");
        assert!(row.requires_memo);
        assert_eq!(row.confirmations_deposit, 3);
        assert_eq!(row.confirmations_withdraw, 3);
        assert_eq!(row.withdraw_fee_fixed, dec!(0.01));
        assert_eq!(row.withdraw_max, dec!(0));
        assert_eq!(row.amount_precision, 7);
        assert!(!mexc.writes_withdraw_max());
    }

    #[test]
    fn test_nested_coin_object() {
        let payload = json!([{
            "coin": {"coin": "btc", "networkList": [{"network": "BTC", "depositEnable": "true"}]}
        }]);
        let rows = adapter().iter_rows(&payload).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].asset_code, "BTC");
        assert!(rows[0].deposit_enabled);
        assert!(!rows[0].withdraw_enabled);
    }
}
