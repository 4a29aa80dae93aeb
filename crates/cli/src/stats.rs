use chrono::{DateTime, Utc};
use marketsync_core::numeric::ReferenceLists;
use marketsync_core::{MarketPair, ProviderRow};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

const TOP_QUOTES: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InOutDeltas {
    pub in_off: u64,
    pub out_off: u64,
}

/// Lightweight per-exchange statistics appended to `stats_history`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub run_at: DateTime<Utc>,
    pub wallet_coins: u64,
    pub market_coins: u64,
    pub coverage_pct: Decimal,
    pub top_quotes: Vec<String>,
    pub deltas_inout: InOutDeltas,
}

/// Quote codes by descending frequency. Ties keep alphabetical order.
fn quotes_by_popularity(markets: &[MarketPair]) -> Vec<String> {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for pair in markets {
        *counts.entry(pair.quote.as_str()).or_default() += 1;
    }
    let mut ranked: Vec<(&str, u64)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    ranked.into_iter().map(|(q, _)| q.to_string()).collect()
}

impl StatsSnapshot {
    pub fn compute(wallet: &[ProviderRow], markets: &[MarketPair], run_at: DateTime<Utc>) -> Self {
        let wallet_coins = wallet
            .iter()
            .map(|r| (r.asset_code.as_str(), r.chain_code.as_str()))
            .collect::<HashSet<_>>()
            .len() as u64;
        let market_coins = markets
            .iter()
            .map(|m| (m.base.as_str(), m.quote.as_str()))
            .collect::<HashSet<_>>()
            .len() as u64;

        let assets: HashSet<&str> = wallet.iter().map(|r| r.asset_code.as_str()).collect();
        let bases: HashSet<&str> = markets.iter().map(|m| m.base.as_str()).collect();
        let coverage_pct = if assets.is_empty() {
            Decimal::ZERO
        } else {
            let covered = assets.intersection(&bases).count();
            (Decimal::from(covered as u64) * Decimal::ONE_HUNDRED / Decimal::from(assets.len() as u64))
                .round_dp(2)
        };

        let mut top_quotes = quotes_by_popularity(markets);
        top_quotes.truncate(TOP_QUOTES);

        let deltas_inout = InOutDeltas {
            in_off: wallet.iter().filter(|r| !r.deposit_enabled).count() as u64,
            out_off: wallet.iter().filter(|r| !r.withdraw_enabled).count() as u64,
        };

        Self {
            run_at,
            wallet_coins,
            market_coins,
            coverage_pct,
            top_quotes,
            deltas_inout,
        }
    }
}

/// Configured stablecoins quoted on the exchange, most popular first, comma
/// separated. `None` when no market quotes a stablecoin.
pub fn stablecoin_summary(markets: &[MarketPair], refs: &ReferenceLists) -> Option<String> {
    let stables: Vec<String> = quotes_by_popularity(markets)
        .into_iter()
        .filter(|q| refs.is_stable(q))
        .collect();
    (!stables.is_empty()).then(|| stables.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pair(base: &str, quote: &str) -> MarketPair {
        MarketPair {
            symbol: format!("{base}{quote}"),
            base: base.into(),
            quote: quote.into(),
        }
    }

    fn row(asset: &str, chain: &str, deposit: bool, withdraw: bool) -> ProviderRow {
        let mut row = ProviderRow::new(asset, chain);
        row.deposit_enabled = deposit;
        row.withdraw_enabled = withdraw;
        row
    }

    #[test]
    fn test_snapshot_counts() {
        let wallet = vec![
            row("BTC", "BTC", true, true),
            row("USDT", "TRX", true, false),
            row("USDT", "ETH", false, false),
            row("XYZ", "ETH", true, true),
        ];
        let markets = vec![
            pair("BTC", "USDT"),
            pair("ETH", "USDT"),
            pair("BTC", "USDC"),
            pair("USDT", "EUR"),
            pair("ETH", "BTC"),
            pair("SOL", "USDT"),
        ];
        let snap = StatsSnapshot::compute(&wallet, &markets, Utc::now());
        assert_eq!(snap.wallet_coins, 4);
        assert_eq!(snap.market_coins, 6);
        // BTC and USDT of {BTC, USDT, XYZ}.
        assert_eq!(snap.coverage_pct, dec!(66.67));
        assert_eq!(snap.top_quotes[0], "USDT");
        assert_eq!(snap.top_quotes.len(), 4);
        assert_eq!(snap.deltas_inout, InOutDeltas { in_off: 1, out_off: 2 });
    }

    #[test]
    fn test_empty_wallet_has_zero_coverage() {
        let snap = StatsSnapshot::compute(&[], &[pair("BTC", "USDT")], Utc::now());
        assert_eq!(snap.coverage_pct, Decimal::ZERO);
        assert_eq!(snap.wallet_coins, 0);
    }

    #[test]
    fn test_stablecoin_summary_by_popularity() {
        let refs = ReferenceLists::from_raw("USDT, USDC", "", "");
        let markets = vec![
            pair("BTC", "USDC"),
            pair("ETH", "USDT"),
            pair("SOL", "USDT"),
            pair("ETH", "BTC"),
        ];
        assert_eq!(stablecoin_summary(&markets, &refs).as_deref(), Some("USDT,USDC"));
        assert_eq!(stablecoin_summary(&[pair("ETH", "BTC")], &refs), None);
    }
}
