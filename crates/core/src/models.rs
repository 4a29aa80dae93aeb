use crate::numeric::AMOUNT_CAP;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Providers & Exchanges
// ---------------------------------------------------------------------------

/// A liquidity provider with a known integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Provider {
    Kucoin,
    Bybit,
    Mexc,
    Htx,
    Whitebit,
    Rapira,
    Twelvedata,
    Openexchangerates,
    Manual,
}

impl Provider {
    pub const ALL: [Provider; 9] = [
        Provider::Kucoin,
        Provider::Bybit,
        Provider::Mexc,
        Provider::Htx,
        Provider::Whitebit,
        Provider::Rapira,
        Provider::Twelvedata,
        Provider::Openexchangerates,
        Provider::Manual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Kucoin => "KUCOIN",
            Provider::Bybit => "BYBIT",
            Provider::Mexc => "MEXC",
            Provider::Htx => "HTX",
            Provider::Whitebit => "WHITEBIT",
            Provider::Rapira => "RAPIRA",
            Provider::Twelvedata => "TWELVEDATA",
            Provider::Openexchangerates => "OPENEXCHANGERATES",
            Provider::Manual => "MANUAL",
        }
    }

    /// Lowercase slug used in file paths and config tables.
    pub fn slug(&self) -> String {
        self.as_str().to_ascii_lowercase()
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        let wanted = match wanted.as_str() {
            "HUOBI" => "HTX",
            "OXR" | "OPEN_EXCHANGE_RATES" => "OPENEXCHANGERATES",
            other => other,
        };
        Provider::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| format!("unknown provider: {s}"))
    }
}

/// What kind of counterparty an exchange row represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExchangeKind {
    Cex,
    Dex,
    Psp,
    Wallet,
    Node,
    Exchanger,
    Bank,
    Manual,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Cex => "CEX",
            ExchangeKind::Dex => "DEX",
            ExchangeKind::Psp => "PSP",
            ExchangeKind::Wallet => "WALLET",
            ExchangeKind::Node => "NODE",
            ExchangeKind::Exchanger => "EXCHANGER",
            ExchangeKind::Bank => "BANK",
            ExchangeKind::Manual => "MANUAL",
        }
    }

    /// Venue classification that drives cache TTLs and sampling cadence.
    pub fn venue_type(&self) -> VenueType {
        match self {
            ExchangeKind::Cex => VenueType::Cex,
            ExchangeKind::Dex => VenueType::Dex,
            ExchangeKind::Psp | ExchangeKind::Bank | ExchangeKind::Wallet | ExchangeKind::Node => {
                VenueType::Psp
            }
            ExchangeKind::Exchanger => VenueType::Otc,
            ExchangeKind::Manual => VenueType::Manual,
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CEX" => Ok(ExchangeKind::Cex),
            "DEX" => Ok(ExchangeKind::Dex),
            "PSP" => Ok(ExchangeKind::Psp),
            "WALLET" => Ok(ExchangeKind::Wallet),
            "NODE" => Ok(ExchangeKind::Node),
            "EXCHANGER" => Ok(ExchangeKind::Exchanger),
            "BANK" => Ok(ExchangeKind::Bank),
            "MANUAL" => Ok(ExchangeKind::Manual),
            other => Err(format!("unknown exchange kind: {other}")),
        }
    }
}

/// Venue type for quotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VenueType {
    Cex,
    Dex,
    Psp,
    Otc,
    Manual,
}

impl VenueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VenueType::Cex => "CEX",
            VenueType::Dex => "DEX",
            VenueType::Psp => "PSP",
            VenueType::Otc => "OTC",
            VenueType::Manual => "MANUAL",
        }
    }
}

impl FromStr for VenueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CEX" => Ok(VenueType::Cex),
            "DEX" => Ok(VenueType::Dex),
            "PSP" => Ok(VenueType::Psp),
            "OTC" => Ok(VenueType::Otc),
            "MANUAL" => Ok(VenueType::Manual),
            other => Err(format!("unknown venue type: {other}")),
        }
    }
}

/// An exchange (liquidity provider account) as stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub id: i64,
    pub name: String,
    pub provider: Provider,
    pub kind: ExchangeKind,
    /// Set by the health checker.
    pub is_available: bool,
    /// Operator-set capability flags.
    pub can_receive: bool,
    pub can_send: bool,
    /// Comma-separated stablecoins seen as quote currencies.
    pub stablecoin: String,
}

impl Exchange {
    /// Effective (receive, send) capability: availability AND the manual flag.
    pub fn effective_modes(&self) -> (bool, bool) {
        (
            self.is_available && self.can_receive,
            self.is_available && self.can_send,
        )
    }
}

/// API credentials for signed provider endpoints.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"***")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Assets
// ---------------------------------------------------------------------------

/// Classification of an asset row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetKind {
    Crypto,
    Fiat,
    Cash,
    PspMoney,
    #[serde(rename = "NOTDEFINED")]
    NotDefined,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Crypto => "CRYPTO",
            AssetKind::Fiat => "FIAT",
            AssetKind::Cash => "CASH",
            AssetKind::PspMoney => "PSP_MONEY",
            AssetKind::NotDefined => "NOTDEFINED",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CRYPTO" => Ok(AssetKind::Crypto),
            "FIAT" => Ok(AssetKind::Fiat),
            "CASH" => Ok(AssetKind::Cash),
            "PSP_MONEY" => Ok(AssetKind::PspMoney),
            "NOTDEFINED" => Ok(AssetKind::NotDefined),
            other => Err(format!("unknown asset kind: {other}")),
        }
    }
}

/// Canonical adapter output: one row per (asset, chain), before business
/// normalization. Values are whatever the provider claims.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderRow {
    pub asset_code: String,
    pub asset_name: String,
    pub chain_code: String,
    pub chain_name: String,
    /// AD as claimed by the provider.
    pub deposit_enabled: bool,
    /// AW as claimed by the provider.
    pub withdraw_enabled: bool,
    pub confirmations_deposit: i32,
    pub confirmations_withdraw: i32,
    pub deposit_fee_percent: Decimal,
    pub deposit_fee_fixed: Decimal,
    pub deposit_min: Decimal,
    pub deposit_max: Decimal,
    pub withdraw_fee_percent: Decimal,
    pub withdraw_fee_fixed: Decimal,
    pub withdraw_min: Decimal,
    pub withdraw_max: Decimal,
    pub requires_memo: bool,
    pub amount_precision: u32,
    pub is_stable: bool,
    /// Kind forced by the adapter (e.g. cash rails); inferred when `None`.
    pub asset_kind: Option<AssetKind>,
    pub raw_meta: serde_json::Value,
}

impl ProviderRow {
    pub fn new(asset_code: impl Into<String>, chain_code: impl Into<String>) -> Self {
        Self {
            asset_code: asset_code.into(),
            asset_name: String::new(),
            chain_code: chain_code.into(),
            chain_name: String::new(),
            deposit_enabled: false,
            withdraw_enabled: false,
            confirmations_deposit: 0,
            confirmations_withdraw: 0,
            deposit_fee_percent: Decimal::ZERO,
            deposit_fee_fixed: Decimal::ZERO,
            deposit_min: Decimal::ZERO,
            deposit_max: Decimal::ZERO,
            withdraw_fee_percent: Decimal::ZERO,
            withdraw_fee_fixed: Decimal::ZERO,
            withdraw_min: Decimal::ZERO,
            withdraw_max: Decimal::ZERO,
            requires_memo: false,
            amount_precision: 8,
            is_stable: false,
            asset_kind: None,
            raw_meta: serde_json::Value::Null,
        }
    }
}

/// Business fields of an asset row that the sync engine owns.
///
/// Field names double as column names in `exchange_assets`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetFields {
    pub asset_name: String,
    pub chain_name: String,
    pub asset_kind: AssetKind,
    pub auto_deposit: bool,
    pub auto_withdraw: bool,
    pub confirmations_deposit: i32,
    pub confirmations_withdraw: i32,
    pub deposit_fee_percent: Decimal,
    pub deposit_fee_fixed: Decimal,
    pub deposit_min: Decimal,
    pub deposit_max: Decimal,
    pub withdraw_fee_percent: Decimal,
    pub withdraw_fee_fixed: Decimal,
    pub withdraw_min: Decimal,
    pub withdraw_max: Decimal,
    pub amount_precision: i32,
    pub requires_memo: bool,
    pub is_stablecoin: bool,
    pub provider_symbol: String,
    pub provider_chain: String,
    pub raw_metadata: serde_json::Value,
}

/// A single column value for a partial update.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Int(i32),
    Decimal(Decimal),
    Text(String),
    Kind(AssetKind),
    Json(serde_json::Value),
}

/// A changed column and its new value.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub column: &'static str,
    pub value: FieldValue,
}

macro_rules! diff_field {
    ($changes:ident, $new:ident, $old:ident, $field:ident, $variant:ident) => {
        if $new.$field != $old.$field {
            $changes.push(FieldChange {
                column: stringify!($field),
                value: FieldValue::$variant($new.$field.clone()),
            });
        }
    };
}

impl AssetFields {
    /// Columns whose value differs from `current`, carrying the new value.
    pub fn diff(&self, current: &AssetFields) -> Vec<FieldChange> {
        let mut changes = Vec::new();
        diff_field!(changes, self, current, asset_name, Text);
        diff_field!(changes, self, current, chain_name, Text);
        diff_field!(changes, self, current, asset_kind, Kind);
        diff_field!(changes, self, current, auto_deposit, Bool);
        diff_field!(changes, self, current, auto_withdraw, Bool);
        diff_field!(changes, self, current, confirmations_deposit, Int);
        diff_field!(changes, self, current, confirmations_withdraw, Int);
        diff_field!(changes, self, current, deposit_fee_percent, Decimal);
        diff_field!(changes, self, current, deposit_fee_fixed, Decimal);
        diff_field!(changes, self, current, deposit_min, Decimal);
        diff_field!(changes, self, current, deposit_max, Decimal);
        diff_field!(changes, self, current, withdraw_fee_percent, Decimal);
        diff_field!(changes, self, current, withdraw_fee_fixed, Decimal);
        diff_field!(changes, self, current, withdraw_min, Decimal);
        diff_field!(changes, self, current, withdraw_max, Decimal);
        diff_field!(changes, self, current, amount_precision, Int);
        diff_field!(changes, self, current, requires_memo, Bool);
        diff_field!(changes, self, current, is_stablecoin, Bool);
        diff_field!(changes, self, current, provider_symbol, Text);
        diff_field!(changes, self, current, provider_chain, Text);
        diff_field!(changes, self, current, raw_metadata, Json);
        changes
    }

    /// Apply a partial update in place. Unknown columns are ignored.
    pub fn apply(&mut self, change: &FieldChange) {
        match (change.column, &change.value) {
            ("asset_name", FieldValue::Text(v)) => self.asset_name = v.clone(),
            ("chain_name", FieldValue::Text(v)) => self.chain_name = v.clone(),
            ("asset_kind", FieldValue::Kind(v)) => self.asset_kind = *v,
            ("auto_deposit", FieldValue::Bool(v)) => self.auto_deposit = *v,
            ("auto_withdraw", FieldValue::Bool(v)) => self.auto_withdraw = *v,
            ("confirmations_deposit", FieldValue::Int(v)) => self.confirmations_deposit = *v,
            ("confirmations_withdraw", FieldValue::Int(v)) => self.confirmations_withdraw = *v,
            ("deposit_fee_percent", FieldValue::Decimal(v)) => self.deposit_fee_percent = *v,
            ("deposit_fee_fixed", FieldValue::Decimal(v)) => self.deposit_fee_fixed = *v,
            ("deposit_min", FieldValue::Decimal(v)) => self.deposit_min = *v,
            ("deposit_max", FieldValue::Decimal(v)) => self.deposit_max = *v,
            ("withdraw_fee_percent", FieldValue::Decimal(v)) => self.withdraw_fee_percent = *v,
            ("withdraw_fee_fixed", FieldValue::Decimal(v)) => self.withdraw_fee_fixed = *v,
            ("withdraw_min", FieldValue::Decimal(v)) => self.withdraw_min = *v,
            ("withdraw_max", FieldValue::Decimal(v)) => self.withdraw_max = *v,
            ("amount_precision", FieldValue::Int(v)) => self.amount_precision = *v,
            ("requires_memo", FieldValue::Bool(v)) => self.requires_memo = *v,
            ("is_stablecoin", FieldValue::Bool(v)) => self.is_stablecoin = *v,
            ("provider_symbol", FieldValue::Text(v)) => self.provider_symbol = v.clone(),
            ("provider_chain", FieldValue::Text(v)) => self.provider_chain = v.clone(),
            ("raw_metadata", FieldValue::Json(v)) => self.raw_metadata = v.clone(),
            _ => {}
        }
    }
}

/// A persisted asset row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub id: i64,
    pub exchange_id: i64,
    pub asset_code: String,
    pub chain_code: String,
    pub fields: AssetFields,
    /// Operator-set D flag. Never written by sync.
    pub manual_deposit: bool,
    /// Operator-set W flag. Never written by sync.
    pub manual_withdraw: bool,
    pub status_note: String,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl AssetRecord {
    /// True when the provider currently allows deposits or withdrawals.
    pub fn is_auto_enabled(&self) -> bool {
        self.fields.auto_deposit || self.fields.auto_withdraw
    }
}

/// Result of writing one normalized row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

// ---------------------------------------------------------------------------
// Sync results
// ---------------------------------------------------------------------------

/// Why a sync pass did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    CircuitOpen,
    Debounced,
    NoSlot,
    Locked,
    AlreadySeeded,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::CircuitOpen => "circuit open",
            SkipReason::Debounced => "debounced",
            SkipReason::NoSlot => "no global slot",
            SkipReason::Locked => "locked",
            SkipReason::AlreadySeeded => "already seeded",
        };
        f.write_str(s)
    }
}

/// Per-pass counters reported by the sync engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub processed: u64,
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub disabled: u64,
    pub skip_reason: Option<SkipReason>,
}

impl SyncStats {
    /// A zero-effect pass.
    pub fn skipped_pass(reason: SkipReason) -> Self {
        Self {
            skip_reason: Some(reason),
            ..Default::default()
        }
    }

    pub fn is_zero_effect(&self) -> bool {
        self.processed == 0 && self.created == 0 && self.updated == 0 && self.disabled == 0
    }
}

impl fmt::Display for SyncStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed={} created={} updated={} skipped={} disabled={}",
            self.processed, self.created, self.updated, self.skipped, self.disabled
        )?;
        if let Some(reason) = self.skip_reason {
            write!(f, " ({reason})")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Quotes
// ---------------------------------------------------------------------------

/// A best bid/ask quote for one pair from one exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct L1Quote {
    pub exchange_id: i64,
    pub provider: Provider,
    pub venue: VenueType,
    pub base: String,
    pub quote: String,
    pub bid: Decimal,
    pub ask: Decimal,
    pub last: Option<Decimal>,
    /// Source timestamp in epoch milliseconds.
    pub ts_src_ms: i64,
    pub src_symbol: String,
    pub fee_taker_bps: Option<Decimal>,
    pub fee_maker_bps: Option<Decimal>,
    pub extras: serde_json::Value,
}

/// Both sides positive, not crossed and within `AMOUNT_CAP`.
fn sane_sides(bid: Decimal, ask: Decimal) -> bool {
    bid > Decimal::ZERO && ask >= bid && ask <= AMOUNT_CAP
}

/// `None` when the sum does not fit a `Decimal`.
fn midpoint(bid: Decimal, ask: Decimal) -> Option<Decimal> {
    bid.checked_add(ask)?.checked_div(Decimal::TWO)
}

impl L1Quote {
    /// Midpoint of bid and ask.
    pub fn mid(&self) -> Option<Decimal> {
        midpoint(self.bid, self.ask)
    }

    /// A quote is publishable when both sides are positive, not crossed and
    /// no larger than the amount cap.
    pub fn is_sane(&self) -> bool {
        sane_sides(self.bid, self.ask)
    }
}

/// A durable, sampled quote row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRow {
    pub exchange_id: i64,
    pub provider: Provider,
    pub src_symbol: String,
    pub base: String,
    pub quote: String,
    pub bid: Decimal,
    pub ask: Decimal,
    pub last: Option<Decimal>,
    pub fee_taker_bps: Option<Decimal>,
    pub fee_maker_bps: Option<Decimal>,
    pub ts_src: DateTime<Utc>,
    pub ts_ingest: DateTime<Utc>,
    pub latency_ms: i32,
    pub status: String,
    pub extras: serde_json::Value,
}

impl PriceRow {
    pub fn mid(&self) -> Option<Decimal> {
        midpoint(self.bid, self.ask)
    }

    pub fn is_sane(&self) -> bool {
        sane_sides(self.bid, self.ask)
    }
}

/// A (base, quote) market listed by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarketPair {
    pub symbol: String,
    pub base: String,
    pub quote: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn fields() -> AssetFields {
        AssetFields {
            asset_name: "Tether".into(),
            chain_name: "Tron".into(),
            asset_kind: AssetKind::Crypto,
            auto_deposit: true,
            auto_withdraw: true,
            confirmations_deposit: 1,
            confirmations_withdraw: 1,
            deposit_fee_percent: Decimal::ZERO,
            deposit_fee_fixed: Decimal::ZERO,
            deposit_min: Decimal::ZERO,
            deposit_max: Decimal::ZERO,
            withdraw_fee_percent: Decimal::ZERO,
            withdraw_fee_fixed: dec!(1),
            withdraw_min: dec!(10),
            withdraw_max: Decimal::ZERO,
            amount_precision: 6,
            requires_memo: false,
            is_stablecoin: true,
            provider_symbol: "USDT".into(),
            provider_chain: "TRX".into(),
            raw_metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn test_diff_reports_only_changed_columns() {
        let current = fields();
        let mut next = fields();
        next.withdraw_fee_fixed = dec!(1.5);
        next.auto_withdraw = false;

        let changes = next.diff(&current);
        let columns: Vec<_> = changes.iter().map(|c| c.column).collect();
        assert_eq!(columns, vec!["auto_withdraw", "withdraw_fee_fixed"]);
    }

    #[test]
    fn test_diff_ignores_scale_only_differences() {
        let current = fields();
        let mut next = fields();
        next.withdraw_min = dec!(10.00000000);
        assert!(next.diff(&current).is_empty());
    }

    #[test]
    fn test_apply_roundtrips_diff() {
        let mut current = fields();
        let mut next = fields();
        next.asset_kind = AssetKind::Fiat;
        next.confirmations_deposit = 0;
        for change in next.diff(&current) {
            current.apply(&change);
        }
        assert_eq!(current, next);
    }

    #[test]
    fn test_provider_parsing() {
        assert_eq!("bybit".parse::<Provider>().unwrap(), Provider::Bybit);
        assert_eq!("huobi".parse::<Provider>().unwrap(), Provider::Htx);
        assert_eq!("oxr".parse::<Provider>().unwrap(), Provider::Openexchangerates);
        assert_eq!(
            "openexchangerates".parse::<Provider>().unwrap(),
            Provider::Openexchangerates
        );
        assert!("nope".parse::<Provider>().is_err());
    }

    #[test]
    fn test_venue_mapping() {
        assert_eq!(ExchangeKind::Cex.venue_type(), VenueType::Cex);
        assert_eq!(ExchangeKind::Exchanger.venue_type(), VenueType::Otc);
        assert_eq!(ExchangeKind::Bank.venue_type(), VenueType::Psp);
    }

    #[test]
    fn test_effective_modes() {
        let ex = Exchange {
            id: 1,
            name: "x".into(),
            provider: Provider::Kucoin,
            kind: ExchangeKind::Cex,
            is_available: false,
            can_receive: true,
            can_send: true,
            stablecoin: String::new(),
        };
        assert_eq!(ex.effective_modes(), (false, false));
    }

    fn l1(bid: Decimal, ask: Decimal) -> L1Quote {
        L1Quote {
            exchange_id: 1,
            provider: Provider::Bybit,
            venue: VenueType::Cex,
            base: "BTC".into(),
            quote: "USDT".into(),
            bid,
            ask,
            last: None,
            ts_src_ms: 0,
            src_symbol: "BTCUSDT".into(),
            fee_taker_bps: None,
            fee_maker_bps: None,
            extras: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_quote_sanity_bounds() {
        assert!(l1(dec!(100), dec!(101)).is_sane());
        assert!(!l1(dec!(101), dec!(100)).is_sane());
        assert!(!l1(Decimal::ZERO, dec!(1)).is_sane());
        assert!(l1(AMOUNT_CAP, AMOUNT_CAP).is_sane());
        assert!(!l1(Decimal::MAX, Decimal::MAX).is_sane());
    }

    #[test]
    fn test_mid_does_not_overflow() {
        assert_eq!(l1(dec!(100), dec!(101)).mid(), Some(dec!(100.5)));
        assert_eq!(l1(AMOUNT_CAP, AMOUNT_CAP).mid(), Some(AMOUNT_CAP));
        assert_eq!(l1(Decimal::MAX, Decimal::MAX).mid(), None);
    }
}
