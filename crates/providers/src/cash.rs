//! Static cash currency seed for the rate-feed providers (Twelve Data,
//! Open Exchange Rates).
//!
//! No HTTP: the currency list is built in. The engine runs this adapter only
//! while the exchange has no assets yet.

use async_trait::async_trait;
use marketsync_core::{AssetKind, Provider, ProviderAdapter, ProviderError, ProviderRow};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize)]
struct CashCurrency {
    code: String,
    name: String,
    precision: u32,
}

const CURRENCIES: &[(&str, &str, u32)] = &[
    ("USD", "US Dollar", 2),
    ("RUB", "Russian Ruble", 2),
    ("EUR", "Euro", 2),
    ("UAH", "Ukrainian Hryvnia", 2),
    ("BYN", "Belarusian Ruble", 2),
    ("KZT", "Kazakhstani Tenge", 2),
    ("GBP", "British Pound", 2),
    ("AED", "UAE Dirham", 2),
    ("TRY", "Turkish Lira", 2),
    ("COP", "Colombian Peso", 2),
    ("PLN", "Polish Zloty", 2),
    ("ILS", "Israeli New Shekel", 2),
    ("CZK", "Czech Koruna", 2),
    ("GEL", "Georgian Lari", 2),
    ("AMD", "Armenian Dram", 2),
    ("CAD", "Canadian Dollar", 2),
    ("THB", "Thai Baht", 2),
    ("AUD", "Australian Dollar", 2),
    ("NGN", "Nigerian Naira", 2),
    ("BGN", "Bulgarian Lev", 2),
    ("AZN", "Azerbaijani Manat", 2),
    ("MDL", "Moldovan Leu", 2),
    ("CHF", "Swiss Franc", 2),
    ("RON", "Romanian Leu", 2),
    ("IDR", "Indonesian Rupiah", 0),
    ("CNY", "Chinese Yuan", 2),
    ("MXN", "Mexican Peso", 2),
    ("SGD", "Singapore Dollar", 2),
    ("KRW", "South Korean Won", 0),
    ("BRL", "Brazilian Real", 2),
    ("INR", "Indian Rupee", 2),
    ("JPY", "Japanese Yen", 0),
    ("ARS", "Argentine Peso", 2),
    ("KGS", "Kyrgyzstani Som", 2),
    ("EGP", "Egyptian Pound", 2),
    ("VND", "Vietnamese Dong", 0),
];

pub struct CashSeedAdapter {
    provider: Provider,
}

impl CashSeedAdapter {
    pub fn new(provider: Provider) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ProviderAdapter for CashSeedAdapter {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn fetch_payload(&self, _timeout: Duration) -> Result<Value, ProviderError> {
        let list: Vec<CashCurrency> = CURRENCIES
            .iter()
            .map(|(code, name, precision)| CashCurrency {
                code: code.to_string(),
                name: name.to_string(),
                precision: *precision,
            })
            .collect();
        Ok(serde_json::to_value(list)?)
    }

    fn iter_rows(&self, payload: &Value) -> Result<Vec<ProviderRow>, ProviderError> {
        let list: Vec<CashCurrency> = serde_json::from_value(payload.clone())?;
        Ok(list
            .into_iter()
            .filter(|c| !c.code.trim().is_empty())
            .map(|c| {
                let mut row = ProviderRow::new(c.code.trim().to_ascii_uppercase(), "");
                row.asset_name = c.name;
                row.deposit_enabled = true;
                row.withdraw_enabled = true;
                row.amount_precision = c.precision;
                row.asset_kind = Some(AssetKind::Cash);
                row.raw_meta = json!({ "source": format!("{}/static_cash", self.provider.slug()) });
                row
            })
            .collect())
    }

    fn seed_only(&self) -> bool {
        true
    }

    fn writes_withdraw_max(&self) -> bool {
        true
    }
}
