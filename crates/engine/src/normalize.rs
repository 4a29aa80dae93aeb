//! Business normalization of canonical adapter rows into storable fields.

use marketsync_core::numeric::{
    crypto_withdraw_guard, ensure_withdraw_confirmations, infer_asset_kind, norm_code,
    to_db_amount, to_db_percent, GuardBounds, ReferenceLists,
};
use marketsync_core::{AssetFields, AssetKind, ProviderRow};
use std::fmt;

/// Precision used for fiat rails when the provider claims more.
pub const FIAT_PRECISION: u32 = 2;

/// Why a row was not turned into fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    EmptyCode,
    /// Withdraw minimum or fixed fee outside the configured bounds.
    Guard,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::EmptyCode => f.write_str("empty asset code"),
            Rejection::Guard => f.write_str("withdraw limits out of bounds"),
        }
    }
}

/// A normalized row ready for upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub asset_code: String,
    pub chain_code: String,
    pub fields: AssetFields,
}

#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    refs: ReferenceLists,
    guard: GuardBounds,
}

impl Normalizer {
    pub fn new(refs: ReferenceLists, guard: GuardBounds) -> Self {
        Self { refs, guard }
    }

    /// Adapter-forced kinds win, except that a chainless row is never CRYPTO.
    fn kind_of(&self, row: &ProviderRow, code: &str, chain: &str) -> AssetKind {
        match row.asset_kind {
            Some(AssetKind::Crypto) | None => {
                infer_asset_kind(code, chain, &row.chain_name, self.refs.fiat_set())
            }
            Some(kind) => kind,
        }
    }

    pub fn normalize(&self, row: &ProviderRow) -> Result<NormalizedRow, Rejection> {
        let code = norm_code(&row.asset_code);
        if code.is_empty() {
            return Err(Rejection::EmptyCode);
        }
        let chain = norm_code(&row.chain_code);
        let kind = self.kind_of(row, &code, &chain);

        let mut precision = row.amount_precision;
        let mut auto_deposit = row.deposit_enabled;
        let mut auto_withdraw = row.withdraw_enabled;
        let mut confirmations = (0, 0);
        let mut withdraw_min = to_db_amount(row.withdraw_min, precision);
        let mut withdraw_fee_fixed = to_db_amount(row.withdraw_fee_fixed, precision);

        match kind {
            AssetKind::Crypto => {
                let (min, fee) = crypto_withdraw_guard(
                    row.withdraw_min,
                    row.withdraw_fee_fixed,
                    precision,
                    &self.guard,
                )
                .ok_or(Rejection::Guard)?;
                withdraw_min = min;
                withdraw_fee_fixed = fee;
                confirmations = ensure_withdraw_confirmations(
                    row.confirmations_deposit.max(1),
                    row.confirmations_withdraw,
                );
            }
            AssetKind::Fiat => {
                precision = precision.min(FIAT_PRECISION);
                withdraw_min = to_db_amount(row.withdraw_min, precision);
                withdraw_fee_fixed = to_db_amount(row.withdraw_fee_fixed, precision);
            }
            AssetKind::NotDefined => {
                auto_deposit = false;
                auto_withdraw = false;
            }
            AssetKind::Cash | AssetKind::PspMoney => {}
        }

        let requires_memo = kind == AssetKind::Crypto
            && (row.requires_memo
                || self.refs.chain_requires_memo(&chain)
                || self.refs.chain_requires_memo(&row.chain_name));

        let asset_name = match row.asset_name.trim() {
            "" => code.clone(),
            name => name.to_string(),
        };
        let chain_name = match row.chain_name.trim() {
            "" => chain.clone(),
            name => name.to_string(),
        };

        let fields = AssetFields {
            asset_name,
            chain_name,
            asset_kind: kind,
            auto_deposit,
            auto_withdraw,
            confirmations_deposit: confirmations.0,
            confirmations_withdraw: confirmations.1,
            deposit_fee_percent: to_db_percent(row.deposit_fee_percent),
            deposit_fee_fixed: to_db_amount(row.deposit_fee_fixed, precision),
            deposit_min: to_db_amount(row.deposit_min, precision),
            deposit_max: to_db_amount(row.deposit_max, precision),
            withdraw_fee_percent: to_db_percent(row.withdraw_fee_percent),
            withdraw_fee_fixed,
            withdraw_min,
            withdraw_max: to_db_amount(row.withdraw_max, precision),
            amount_precision: precision as i32,
            requires_memo,
            is_stablecoin: row.is_stable || self.refs.is_stable(&code),
            provider_symbol: row.asset_code.trim().to_string(),
            provider_chain: row.chain_code.trim().to_string(),
            raw_metadata: row.raw_meta.clone(),
        };

        Ok(NormalizedRow {
            asset_code: code,
            chain_code: chain,
            fields,
        })
    }
}
