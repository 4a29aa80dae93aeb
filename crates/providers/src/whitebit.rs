//! WhiteBIT wallet adapter.
//!
//! Public `assets` and `fee` endpoints, plus the signed main-account fee
//! schedule when credentials exist. Private fees win over public ones.
//! Assets carrying a `providers` key are fiat cash rails.

use crate::http::HttpClient;
use crate::signing::whitebit_payload;
use crate::{confirmations, first_text, precision, text};
use async_trait::async_trait;
use chrono::Utc;
use marketsync_core::numeric::{norm_code, parse_bool, parse_decimal, parse_int};
use marketsync_core::{AssetKind, Credentials, Provider, ProviderAdapter, ProviderError, ProviderRow};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

pub const BASE_URL: &str = "https://whitebit.com";
const ASSETS_PATH: &str = "/api/v4/public/assets";
const FEE_PATH: &str = "/api/v4/public/fee";
const PRIVATE_FEE_PATH: &str = "/api/v4/main-account/fee";

#[derive(Debug, Default, Deserialize)]
struct Asset {
    #[serde(default)]
    name: Value,
    #[serde(default)]
    can_deposit: Value,
    #[serde(default)]
    can_withdraw: Value,
    #[serde(default)]
    is_memo: Value,
    #[serde(default)]
    currency_precision: Value,
    #[serde(default)]
    networks: Value,
    #[serde(default)]
    confirmations: Value,
    #[serde(default)]
    limits: Value,
}

#[derive(Debug, Clone, PartialEq)]
struct FeeSide {
    fixed: Decimal,
    percent: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
struct FeePack {
    deposit: FeeSide,
    withdraw: FeeSide,
}

#[derive(Serialize)]
struct PrivateRequest<'a> {
    request: &'a str,
    nonce: i64,
}

pub struct WhitebitAdapter {
    http: HttpClient,
    credentials: Option<Credentials>,
    base_url: String,
}

impl WhitebitAdapter {
    pub fn new(http: HttpClient, credentials: Option<Credentials>) -> Self {
        Self {
            http,
            credentials,
            base_url: BASE_URL.to_string(),
        }
    }

    async fn fetch_private_fees(
        &self,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<Value, ProviderError> {
        let body = serde_json::to_vec(&PrivateRequest {
            request: PRIVATE_FEE_PATH,
            nonce: Utc::now().timestamp_millis(),
        })?;
        let (payload, signature) = whitebit_payload(&credentials.api_secret, &body)?;

        let request = self
            .http
            .post(&format!("{}{}", self.base_url, PRIVATE_FEE_PATH))
            .header("Content-Type", "application/json")
            .header("X-TXC-APIKEY", &credentials.api_key)
            .header("X-TXC-PAYLOAD", payload)
            .header("X-TXC-SIGNATURE", signature)
            .body(body);
        self.http.send_json(request, timeout).await
    }
}

/// `flex` is either a bare number or `{"percent": ..}`.
fn flex_percent(value: Option<&Value>) -> Decimal {
    match value {
        Some(Value::Object(map)) => map.get("percent").map(parse_decimal).unwrap_or_default(),
        Some(other) => parse_decimal(other),
        None => Decimal::ZERO,
    }
}

fn field<'a>(value: &'a Value, key: &str) -> &'a Value {
    value.get(key).unwrap_or(&Value::Null)
}

/// Split `"USDT (TRC20)"` into `("USDT", Some("TRC20"))`.
fn split_fee_key(key: &str) -> (String, Option<String>) {
    match key.split_once('(') {
        Some((ticker, rest)) => {
            let network = norm_code(rest.trim_end().trim_end_matches(')'));
            (norm_code(ticker), (!network.is_empty()).then_some(network))
        }
        None => (norm_code(key), None),
    }
}

fn parse_public_fees(raw: &Value) -> HashMap<(String, Option<String>), FeePack> {
    let mut out = HashMap::new();
    let Some(map) = raw.as_object() else {
        return out;
    };
    for (key, row) in map {
        if !row.is_object() {
            continue;
        }
        let deposit = field(row, "deposit");
        let withdraw = field(row, "withdraw");
        out.insert(
            split_fee_key(key),
            FeePack {
                deposit: FeeSide {
                    fixed: parse_decimal(field(deposit, "fixed")),
                    percent: flex_percent(deposit.get("flex")),
                },
                withdraw: FeeSide {
                    fixed: parse_decimal(field(withdraw, "fixed")),
                    percent: flex_percent(withdraw.get("flex")),
                },
            },
        );
    }
    out
}

fn parse_private_fees(raw: &Value) -> HashMap<String, FeePack> {
    let mut out = HashMap::new();
    for row in raw.as_array().map(Vec::as_slice).unwrap_or_default() {
        let ticker = norm_code(&text(field(row, "ticker")));
        if ticker.is_empty() {
            continue;
        }
        let deposit = field(row, "deposit");
        let withdraw = field(row, "withdraw");
        out.insert(
            ticker,
            FeePack {
                deposit: FeeSide {
                    fixed: parse_decimal(field(deposit, "fixed")),
                    percent: parse_decimal(field(deposit, "percentFlex")),
                },
                withdraw: FeeSide {
                    fixed: parse_decimal(field(withdraw, "fixed")),
                    percent: parse_decimal(field(withdraw, "percentFlex")),
                },
            },
        );
    }
    out
}

struct Networks {
    all: Vec<String>,
    deposit: BTreeSet<String>,
    withdraw: BTreeSet<String>,
}

/// Networks may be a string, a list, `{deposits, withdraws}`, or a map keyed
/// by network. With nothing there, fall back to the confirmation keys.
fn collect_networks(asset: &Asset) -> Networks {
    let mut all = BTreeSet::new();
    let mut deposit = BTreeSet::new();
    let mut withdraw = BTreeSet::new();

    match &asset.networks {
        Value::String(s) => {
            all.insert(norm_code(s));
        }
        Value::Array(items) => {
            all.extend(items.iter().map(|n| norm_code(&text(n))));
        }
        Value::Object(map) if map.contains_key("deposits") || map.contains_key("withdraws") => {
            for (key, target) in [("deposits", &mut deposit), ("withdraws", &mut withdraw)] {
                for n in map.get(key).and_then(Value::as_array).into_iter().flatten() {
                    let code = norm_code(&text(n));
                    all.insert(code.clone());
                    target.insert(code);
                }
            }
        }
        Value::Object(map) => {
            all.extend(map.keys().map(|k| norm_code(k)));
        }
        _ => {}
    }

    if all.is_empty() {
        if let Some(map) = asset.confirmations.as_object() {
            all.extend(map.keys().map(|k| norm_code(k)));
        }
    }
    all.remove("");

    Networks {
        all: all.into_iter().collect(),
        deposit,
        withdraw,
    }
}

/// Look up a network key case-insensitively in a provider map.
fn network_entry<'a>(map: &'a Value, network: &str) -> &'a Value {
    map.as_object()
        .and_then(|m| {
            m.iter()
                .find(|(k, _)| norm_code(k) == network)
                .map(|(_, v)| v)
        })
        .unwrap_or(&Value::Null)
}

fn cash_row(ticker: &str, name: &str, raw: &Value) -> ProviderRow {
    let mut row = ProviderRow::new(ticker, "");
    row.asset_name = name.to_string();
    row.deposit_enabled = true;
    row.withdraw_enabled = true;
    row.amount_precision = 2;
    row.asset_kind = Some(AssetKind::Cash);
    row.raw_meta = raw.clone();
    row
}

#[async_trait]
impl ProviderAdapter for WhitebitAdapter {
    fn provider(&self) -> Provider {
        Provider::Whitebit
    }

    async fn fetch_payload(&self, timeout: Duration) -> Result<Value, ProviderError> {
        let assets = self
            .http
            .get_json(&format!("{}{}", self.base_url, ASSETS_PATH), timeout)
            .await?;
        let fee_public = self
            .http
            .get_json(&format!("{}{}", self.base_url, FEE_PATH), timeout)
            .await?;

        let fee_private = match &self.credentials {
            Some(credentials) => match self.fetch_private_fees(credentials, timeout).await {
                Ok(fees) => fees,
                Err(e) => {
                    tracing::warn!(error = %e, "WhiteBIT private fees unavailable, using public fees");
                    Value::Null
                }
            },
            None => Value::Null,
        };

        Ok(json!({
            "assets": assets,
            "fee_public": fee_public,
            "fee_private": fee_private,
        }))
    }

    fn iter_rows(&self, payload: &Value) -> Result<Vec<ProviderRow>, ProviderError> {
        let assets: &Map<String, Value> = payload
            .get("assets")
            .and_then(Value::as_object)
            .ok_or_else(|| ProviderError::Parse("whitebit: assets must be an object".into()))?;
        let public = parse_public_fees(field(payload, "fee_public"));
        let private = parse_private_fees(field(payload, "fee_private"));

        let mut rows = Vec::new();
        for (ticker, raw) in assets {
            let code = norm_code(ticker);
            if code.is_empty() {
                continue;
            }
            let Ok(asset) = Asset::deserialize(raw) else {
                tracing::debug!(ticker = %code, "Dropping malformed WhiteBIT asset");
                continue;
            };
            let name = first_text(&[&asset.name]);
            let name = if name.is_empty() { code.clone() } else { name };

            if raw.get("providers").is_some() {
                rows.push(cash_row(&code, &name, raw));
                continue;
            }

            let can_deposit = parse_bool(&[&asset.can_deposit]);
            let can_withdraw = parse_bool(&[&asset.can_withdraw]);
            let memo = parse_bool(&[&asset.is_memo]);
            let amount_precision = precision(match parse_int(&asset.currency_precision) {
                0 => 8,
                p => p,
            });

            let networks = collect_networks(&asset);
            let all = if networks.all.is_empty() {
                vec![code.clone()]
            } else {
                networks.all.clone()
            };

            for net in all {
                let dep_limits = network_entry(field(&asset.limits, "deposit"), &net);
                let wd_limits = network_entry(field(&asset.limits, "withdraw"), &net);
                let conf = confirmations(parse_int(network_entry(&asset.confirmations, &net)));

                let fees = private
                    .get(&code)
                    .or_else(|| public.get(&(code.clone(), Some(net.clone()))))
                    .or_else(|| public.get(&(code.clone(), None)));

                let mut row = ProviderRow::new(code.clone(), net.clone());
                row.asset_name = name.clone();
                row.chain_name = net.clone();
                row.deposit_enabled = can_deposit && networks.deposit.contains(&net);
                row.withdraw_enabled = can_withdraw && networks.withdraw.contains(&net);
                row.confirmations_deposit = conf;
                row.confirmations_withdraw = conf;
                row.deposit_min = parse_decimal(field(dep_limits, "min"));
                row.deposit_max = parse_decimal(field(dep_limits, "max"));
                row.withdraw_min = parse_decimal(field(wd_limits, "min"));
                row.withdraw_max = parse_decimal(field(wd_limits, "max"));
                if let Some(pack) = fees {
                    row.deposit_fee_fixed = pack.deposit.fixed;
                    row.deposit_fee_percent = pack.deposit.percent;
                    row.withdraw_fee_fixed = pack.withdraw.fixed;
                    row.withdraw_fee_percent = pack.withdraw.percent;
                }
                row.requires_memo = memo;
                row.amount_precision = amount_precision;
                row.raw_meta = raw.clone();
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

    fn adapter() -> WhitebitAdapter {
        WhitebitAdapter::new(HttpClient::new().unwrap(), None)
    }

    fn payload(fee_private: Value) -> Value {
        json!({
            "assets": {
                "USDT": {
                    "name": "Tether US",
                    "can_deposit": true,
                    "can_withdraw": true,
                    "currency_precision": 6,
                    "is_memo": false,
                    "networks": {"deposits": ["ERC20", "TRC20"], "withdraws": ["TRC20"], "default": "ERC20"},
                    "limits": {
                        "deposit": {"ERC20": {"min": "5"}, "TRC20": {"min": "1"}},
                        "withdraw": {"TRC20": {"min": "10", "max": "100000"}}
                    },
                    "confirmations": {"ERC20": 12, "TRC20": 20}
                },
                "EUR": {"name": "Euro", "providers": {"deposits": ["VISAMASTER"]}},
                "XRP": {"name": "Ripple", "can_deposit": true, "can_withdraw": false, "is_memo": true,
                        "confirmations": {"XRP": 1}}
            },
            "fee_public": {
                "USDT (TRC20)": {"deposit": {"fixed": "0", "flex": null},
                                  "withdraw": {"fixed": "1", "flex": {"percent": "0"}}},
                "USDT (ERC20)": {"deposit": {"fixed": "0"}, "withdraw": {"fixed": "5"}}
            },
            "fee_private": fee_private
        })
    }

    #[test]
    fn test_public_fee_key_parsing() {
        assert_eq!(split_fee_key("USDT (TRC20)"), ("USDT".into(), Some("TRC20".into())));
        assert_eq!(split_fee_key("btc"), ("BTC".into(), None));
    }

    #[test]
    fn test_maps_crypto_and_cash() {
        let rows = adapter().iter_rows(&payload(Value::Null)).unwrap();

        let eur = rows.iter().find(|r| r.asset_code == "EUR").unwrap();
        assert_eq!(eur.asset_kind, Some(AssetKind::Cash));
        assert_eq!(eur.chain_code, "");
        assert!(eur.deposit_enabled && eur.withdraw_enabled);

        let trc = rows
            .iter()
            .find(|r| r.asset_code == "USDT" && r.chain_code == "TRC20")
            .unwrap();
        assert!(trc.deposit_enabled && trc.withdraw_enabled);
        assert_eq!(trc.confirmations_deposit, 20);
        assert_eq!(trc.withdraw_min, dec!(10));
        assert_eq!(trc.withdraw_fee_fixed, dec!(1));
        assert_eq!(trc.amount_precision, 6);

        let erc = rows
            .iter()
            .find(|r| r.asset_code == "USDT" && r.chain_code == "ERC20")
            .unwrap();
        assert!(erc.deposit_enabled);
        assert!(!erc.withdraw_enabled);
        assert_eq!(erc.withdraw_fee_fixed, dec!(5));

        // Network list falls back to the confirmation keys.
        let xrp = rows.iter().find(|r| r.asset_code == "XRP").unwrap();
        assert_eq!(xrp.chain_code, "XRP");
        assert!(xrp.requires_memo);
        assert!(!xrp.deposit_enabled);
    }

    #[test]
    fn test_private_fees_win() {
        let private = json!([{
            "ticker": "USDT",
            "deposit": {"fixed": "0", "percentFlex": "0"},
            "withdraw": {"fixed": "0.8", "percentFlex": "0.1"}
        }]);
        let rows = adapter().iter_rows(&payload(private)).unwrap();
        for row in rows.iter().filter(|r| r.asset_code == "USDT") {
            assert_eq!(row.withdraw_fee_fixed, dec!(0.8));
            assert_eq!(row.withdraw_fee_percent, dec!(0.1));
        }
    }
}
