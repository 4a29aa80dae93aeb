//! Numeric normalization and asset classification.
//!
//! Amounts are stored as `NUMERIC(28,10)` and percents as `NUMERIC(12,5)`;
//! everything that reaches the database goes through [`to_db_amount`] or
//! [`to_db_percent`].

use crate::models::AssetKind;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde_json::Value;
use std::collections::HashSet;
use std::str::FromStr;

/// Largest storable amount: 18 integer digits and 10 fractional digits.
pub const AMOUNT_CAP: Decimal = dec!(999999999999999999.9999999999);

/// Maximum number of fractional digits for amounts.
pub const MAX_AMOUNT_PRECISION: u32 = 10;

/// Fractional digits kept for percents.
pub const PERCENT_PRECISION: u32 = 5;

pub const MAX_PERCENT: Decimal = dec!(100);

/// Tokens that mark a chain or rail as fiat.
pub const FIAT_HINTS: [&str; 9] = [
    "FIAT", "BANK", "WIRE", "SEPA", "SWIFT", "CARD", "FUNDING", "PAY", "PAYMENT",
];

const NULL_TOKENS: [&str; 14] = [
    "", "na", "n/a", "nan", "null", "none", "-", "\u{2014}", "inf", "infinity", "-inf",
    "-infinity", "+inf", "+infinity",
];

const DEFAULT_FIAT: &str = "USD EUR GBP CHF JPY CNY AUD CAD NZD SEK NOK DKK RUB UAH KZT TRY \
                            BRL MXN PLN CZK HUF AED SAR ILS HKD SGD INR ZAR";

// ---------------------------------------------------------------------------
// Quantization
// ---------------------------------------------------------------------------

/// Clamp to `[0, AMOUNT_CAP]` and truncate toward zero to `places` decimals.
///
/// `places` is clamped to [`MAX_AMOUNT_PRECISION`]. The result always carries
/// exactly `places` fractional digits, so `10` at 8 places renders as
/// `10.00000000`. Negative values become zero.
pub fn to_db_amount(value: Decimal, places: u32) -> Decimal {
    let places = places.min(MAX_AMOUNT_PRECISION);
    let clamped = if value.is_sign_negative() {
        Decimal::ZERO
    } else {
        value.min(AMOUNT_CAP)
    };
    let mut out = clamped.round_dp_with_strategy(places, RoundingStrategy::ToZero);
    out.rescale(places);
    out
}

/// Clamp to `[0, 100]` and round half-up to [`PERCENT_PRECISION`] digits.
pub fn to_db_percent(value: Decimal) -> Decimal {
    let clamped = value.max(Decimal::ZERO).min(MAX_PERCENT);
    let mut out =
        clamped.round_dp_with_strategy(PERCENT_PRECISION, RoundingStrategy::MidpointAwayFromZero);
    out.rescale(PERCENT_PRECISION);
    out
}

/// Convert a provider ratio (0.001 = 0.1%) into a percent.
pub fn ratio_to_percent(ratio: Decimal) -> Decimal {
    ratio * dec!(100)
}

// ---------------------------------------------------------------------------
// Lenient parsing
// ---------------------------------------------------------------------------

/// Parse a loosely typed JSON value into a decimal.
///
/// Nulls, booleans, null-like strings and anything without a numeric token
/// become zero. Results are capped to `±AMOUNT_CAP`.
pub fn parse_decimal(value: &Value) -> Decimal {
    let parsed = match value {
        Value::Number(n) => parse_token(&n.to_string()),
        Value::String(s) => match extract_number_token(s) {
            Some(token) => parse_token(&token),
            None => Decimal::ZERO,
        },
        _ => Decimal::ZERO,
    };
    parsed.max(-AMOUNT_CAP).min(AMOUNT_CAP)
}

/// Same as [`parse_decimal`] for an optional field.
pub fn parse_decimal_opt(value: Option<&Value>) -> Decimal {
    value.map(parse_decimal).unwrap_or(Decimal::ZERO)
}

/// Parse a string that should hold a plain number, e.g. a ticker price.
/// Returns `None` when there is nothing numeric to read. Capped like
/// [`parse_decimal`].
pub fn parse_price(raw: &str) -> Option<Decimal> {
    let token = extract_number_token(raw)?;
    Some(parse_token(&token).max(-AMOUNT_CAP).min(AMOUNT_CAP))
}

/// Integer view of [`parse_decimal`], truncated toward zero.
pub fn parse_int(value: &Value) -> i64 {
    parse_decimal(value).trunc().to_i64().unwrap_or(0)
}

/// [`parse_int`] clamped to `[min, max]`.
pub fn parse_int_clamped(value: &Value, min: i64, max: i64) -> i64 {
    parse_int(value).clamp(min, max)
}

/// Interpret provider flags. The first decisive value wins.
pub fn parse_bool(values: &[&Value]) -> bool {
    for value in values {
        match value {
            Value::Bool(b) => return *b,
            Value::Number(n) => return n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "y" | "on" | "enabled" | "allow" | "allowed" => return true,
                "0" | "false" | "no" | "n" | "off" | "disabled" | "deny" | "denied" => {
                    return false
                }
                _ => {}
            },
            _ => {}
        }
    }
    false
}

fn extract_number_token(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != '\u{a0}' && *c != ' ' && *c != '_')
        .collect();
    if NULL_TOKENS.contains(&cleaned.to_ascii_lowercase().as_str()) {
        return None;
    }

    let bytes = cleaned.as_bytes();
    let start_digit = bytes.iter().position(|b| b.is_ascii_digit())?;
    let start = if start_digit > 0 && matches!(bytes[start_digit - 1], b'-' | b'+') {
        start_digit - 1
    } else {
        start_digit
    };

    let mut end = start_digit;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end + 1 < bytes.len() && matches!(bytes[end], b'.' | b',') && bytes[end + 1].is_ascii_digit()
    {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut j = end + 1;
        if j < bytes.len() && matches!(bytes[j], b'-' | b'+') {
            j += 1;
        }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            end = j;
        }
    }

    Some(cleaned[start..end].replace(',', "."))
}

fn parse_token(token: &str) -> Decimal {
    let token = token.trim_start_matches('+');
    let parsed = if token.contains(['e', 'E']) {
        Decimal::from_scientific(token)
    } else {
        Decimal::from_str(token)
    };
    match parsed {
        Ok(d) => d,
        // Out of range for a 96-bit mantissa: tiny values vanish, huge ones cap.
        Err(_) if token.to_ascii_lowercase().contains("e-") => Decimal::ZERO,
        Err(_) if token.starts_with('-') => -AMOUNT_CAP,
        Err(_) => AMOUNT_CAP,
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Trim and upper-case a provider code.
pub fn norm_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// Classify an (asset, chain) pair.
///
/// FIAT when the code is a configured fiat currency or the chain looks like a
/// fiat rail; NOTDEFINED when there is no chain; CRYPTO otherwise.
pub fn infer_asset_kind(
    asset_code: &str,
    chain_code: &str,
    chain_display: &str,
    fiat: &HashSet<String>,
) -> AssetKind {
    let code = norm_code(asset_code);
    let chain = norm_code(chain_code);
    let display = norm_code(chain_display);

    if fiat.contains(&code)
        || FIAT_HINTS.contains(&chain.as_str())
        || FIAT_HINTS.iter().any(|hint| display.contains(hint))
    {
        return AssetKind::Fiat;
    }
    if chain.is_empty() {
        return AssetKind::NotDefined;
    }
    AssetKind::Crypto
}

/// Withdraw confirmations are never below deposit confirmations.
pub fn ensure_withdraw_confirmations(deposit: i32, withdraw: i32) -> (i32, i32) {
    (deposit, withdraw.max(deposit))
}

/// Sanity bounds for crypto withdraw limits.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardBounds {
    pub withdraw_min_floor: Decimal,
    pub withdraw_min_ceiling: Decimal,
    pub withdraw_fee_fixed_ceiling: Decimal,
}

impl Default for GuardBounds {
    fn default() -> Self {
        Self {
            withdraw_min_floor: Decimal::ZERO,
            withdraw_min_ceiling: dec!(100000),
            withdraw_fee_fixed_ceiling: dec!(100000),
        }
    }
}

/// Quantize the withdraw minimum and fixed fee, rejecting rows outside the
/// configured bounds. Returns the quantized `(withdraw_min, fee_fixed)`.
pub fn crypto_withdraw_guard(
    withdraw_min: Decimal,
    fee_fixed: Decimal,
    precision: u32,
    bounds: &GuardBounds,
) -> Option<(Decimal, Decimal)> {
    let min_q = to_db_amount(withdraw_min, precision);
    let fee_q = to_db_amount(fee_fixed, precision);
    if min_q < bounds.withdraw_min_floor || min_q > bounds.withdraw_min_ceiling {
        return None;
    }
    if fee_q > bounds.withdraw_fee_fixed_ceiling {
        return None;
    }
    Some((min_q, fee_q))
}

// ---------------------------------------------------------------------------
// Reference lists
// ---------------------------------------------------------------------------

/// Split a comma/semicolon/whitespace separated list into upper-case codes.
pub fn split_codes(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .map(norm_code)
        .filter(|c| !c.is_empty())
        .filter(|c| seen.insert(c.clone()))
        .collect()
}

/// Global reference lists used during normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceLists {
    pub stablecoins: HashSet<String>,
    pub memo_required_chains: HashSet<String>,
    pub fiat: HashSet<String>,
}

impl ReferenceLists {
    pub fn from_raw(stablecoins: &str, memo_required_chains: &str, fiat: &str) -> Self {
        let fiat_codes: HashSet<String> = split_codes(fiat).into_iter().collect();
        Self {
            stablecoins: split_codes(stablecoins).into_iter().collect(),
            memo_required_chains: split_codes(memo_required_chains).into_iter().collect(),
            fiat: if fiat_codes.is_empty() {
                split_codes(DEFAULT_FIAT).into_iter().collect()
            } else {
                fiat_codes
            },
        }
    }

    pub fn stable_set(&self) -> &HashSet<String> {
        &self.stablecoins
    }

    pub fn memo_required_set(&self) -> &HashSet<String> {
        &self.memo_required_chains
    }

    pub fn fiat_set(&self) -> &HashSet<String> {
        &self.fiat
    }

    pub fn is_stable(&self, asset_code: &str) -> bool {
        self.stablecoins.contains(&norm_code(asset_code))
    }

    pub fn chain_requires_memo(&self, chain_code: &str) -> bool {
        self.memo_required_chains.contains(&norm_code(chain_code))
    }
}
