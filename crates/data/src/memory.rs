//! In-process repository used by tests and single-process dry runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marketsync_core::*;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct State {
    exchanges: Vec<Exchange>,
    credentials: HashMap<i64, Credentials>,
    assets: Vec<AssetRecord>,
    next_asset_id: i64,
    prices: Vec<PriceRow>,
    latest: HashMap<(i64, String, String), L1Quote>,
    availability_log: Vec<AvailabilityEntry>,
    stats_history: HashMap<i64, Vec<serde_json::Value>>,
}

/// A repository that keeps everything in memory.
#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<State>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_exchange(&self, exchange: Exchange) {
        self.lock().exchanges.push(exchange);
    }

    pub fn set_credentials(&self, exchange_id: i64, credentials: Credentials) {
        self.lock().credentials.insert(exchange_id, credentials);
    }

    /// Snapshot of all asset rows for an exchange.
    pub fn assets(&self, exchange_id: i64) -> Vec<AssetRecord> {
        self.lock()
            .assets
            .iter()
            .filter(|a| a.exchange_id == exchange_id)
            .cloned()
            .collect()
    }

    pub fn prices(&self) -> Vec<PriceRow> {
        self.lock().prices.clone()
    }

    pub fn latest_quotes(&self) -> Vec<L1Quote> {
        self.lock().latest.values().cloned().collect()
    }

    pub fn availability_log(&self) -> Vec<AvailabilityEntry> {
        self.lock().availability_log.clone()
    }

    pub fn stats_history(&self, exchange_id: i64) -> Vec<serde_json::Value> {
        self.lock()
            .stats_history
            .get(&exchange_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl AssetRepository for MemoryRepository {
    async fn find_asset(
        &self,
        exchange_id: i64,
        asset_code: &str,
        chain_code: &str,
    ) -> Result<Option<AssetRecord>, RepoError> {
        Ok(self
            .lock()
            .assets
            .iter()
            .find(|a| {
                a.exchange_id == exchange_id && a.asset_code == asset_code && a.chain_code == chain_code
            })
            .cloned())
    }

    async fn upsert_asset(
        &self,
        exchange_id: i64,
        asset_code: &str,
        chain_code: &str,
        fields: &AssetFields,
        synced_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome, RepoError> {
        let mut state = self.lock();
        let existing = state.assets.iter_mut().find(|a| {
            a.exchange_id == exchange_id && a.asset_code == asset_code && a.chain_code == chain_code
        });

        if let Some(record) = existing {
            let changes = fields.diff(&record.fields);
            for change in &changes {
                record.fields.apply(change);
            }
            record.last_synced_at = Some(synced_at);
            if changes.is_empty() {
                return Ok(UpsertOutcome::Unchanged);
            }
            record.updated_at = synced_at;
            return Ok(UpsertOutcome::Updated);
        }

        state.next_asset_id += 1;
        let id = state.next_asset_id;
        state.assets.push(AssetRecord {
            id,
            exchange_id,
            asset_code: asset_code.to_string(),
            chain_code: chain_code.to_string(),
            fields: fields.clone(),
            manual_deposit: true,
            manual_withdraw: true,
            status_note: String::new(),
            last_synced_at: Some(synced_at),
            updated_at: synced_at,
        });
        Ok(UpsertOutcome::Created)
    }

    async fn list_enabled_assets(&self, exchange_id: i64) -> Result<Vec<AssetRecord>, RepoError> {
        Ok(self
            .lock()
            .assets
            .iter()
            .filter(|a| a.exchange_id == exchange_id && a.is_auto_enabled())
            .cloned()
            .collect())
    }

    async fn disable_asset(&self, id: i64, note: &str) -> Result<(), RepoError> {
        let mut state = self.lock();
        let record = state
            .assets
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| RepoError::NotFound(format!("asset {id}")))?;
        record.fields.auto_deposit = false;
        record.fields.auto_withdraw = false;
        record.status_note = note.to_string();
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn count_assets(&self, exchange_id: i64) -> Result<i64, RepoError> {
        Ok(self
            .lock()
            .assets
            .iter()
            .filter(|a| a.exchange_id == exchange_id)
            .count() as i64)
    }
}

#[async_trait]
impl ExchangeRepository for MemoryRepository {
    async fn get_exchange(&self, id: i64) -> Result<Option<Exchange>, RepoError> {
        Ok(self.lock().exchanges.iter().find(|e| e.id == id).cloned())
    }

    async fn list_exchanges(&self, providers: &[Provider]) -> Result<Vec<Exchange>, RepoError> {
        let mut out: Vec<Exchange> = self
            .lock()
            .exchanges
            .iter()
            .filter(|e| providers.is_empty() || providers.contains(&e.provider))
            .cloned()
            .collect();
        out.sort_by_key(|e| e.id);
        Ok(out)
    }

    async fn credentials(&self, exchange_id: i64) -> Result<Option<Credentials>, RepoError> {
        Ok(self.lock().credentials.get(&exchange_id).cloned())
    }

    async fn set_availability(&self, exchange_id: i64, available: bool) -> Result<bool, RepoError> {
        let mut state = self.lock();
        let exchange = state
            .exchanges
            .iter_mut()
            .find(|e| e.id == exchange_id)
            .ok_or_else(|| RepoError::NotFound(format!("exchange {exchange_id}")))?;
        let changed = exchange.is_available != available;
        exchange.is_available = available;
        Ok(changed)
    }

    async fn log_availability(&self, entry: &AvailabilityEntry) -> Result<(), RepoError> {
        self.lock().availability_log.push(entry.clone());
        Ok(())
    }

    async fn prune_availability(&self, before: DateTime<Utc>) -> Result<u64, RepoError> {
        let mut state = self.lock();
        let len = state.availability_log.len();
        state.availability_log.retain(|e| e.checked_at >= before);
        Ok((len - state.availability_log.len()) as u64)
    }

    async fn append_stats(
        &self,
        exchange_id: i64,
        snapshot: &serde_json::Value,
        stablecoin: Option<&str>,
    ) -> Result<(), RepoError> {
        let mut state = self.lock();
        state
            .stats_history
            .entry(exchange_id)
            .or_default()
            .push(snapshot.clone());
        if let Some(stable) = stablecoin {
            if let Some(exchange) = state.exchanges.iter_mut().find(|e| e.id == exchange_id) {
                exchange.stablecoin = stable.to_string();
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PriceRepository for MemoryRepository {
    async fn insert_price(&self, row: &PriceRow) -> Result<(), RepoError> {
        if row.bid < rust_decimal::Decimal::ZERO || row.ask < row.bid {
            return Err(RepoError::Database(
                "check constraint violated: ask >= bid >= 0".to_string(),
            ));
        }
        self.lock().prices.push(row.clone());
        Ok(())
    }

    async fn latest_price(
        &self,
        exchange_id: i64,
        base: &str,
        quote: &str,
    ) -> Result<Option<PriceRow>, RepoError> {
        Ok(self
            .lock()
            .prices
            .iter()
            .filter(|p| p.exchange_id == exchange_id && p.base == base && p.quote == quote)
            .max_by_key(|p| p.ts_src)
            .cloned())
    }

    async fn upsert_latest_quote(&self, quote: &L1Quote) -> Result<(), RepoError> {
        self.lock().latest.insert(
            (quote.exchange_id, quote.base.clone(), quote.quote.clone()),
            quote.clone(),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn fields() -> AssetFields {
        AssetFields {
            asset_name: "Bitcoin".into(),
            chain_name: "Bitcoin".into(),
            asset_kind: AssetKind::Crypto,
            auto_deposit: true,
            auto_withdraw: true,
            confirmations_deposit: 2,
            confirmations_withdraw: 2,
            deposit_fee_percent: dec!(0),
            deposit_fee_fixed: dec!(0),
            deposit_min: dec!(0),
            deposit_max: dec!(0),
            withdraw_fee_percent: dec!(0),
            withdraw_fee_fixed: dec!(0.0005),
            withdraw_min: dec!(0.001),
            withdraw_max: dec!(0),
            amount_precision: 8,
            requires_memo: false,
            is_stablecoin: false,
            provider_symbol: "BTC".into(),
            provider_chain: "BTC".into(),
            raw_metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_upsert_created_unchanged_updated() {
        let repo = MemoryRepository::new();
        let now = Utc::now();
        let f = fields();

        assert_eq!(
            repo.upsert_asset(1, "BTC", "BTC", &f, now).await.unwrap(),
            UpsertOutcome::Created
        );
        assert_eq!(
            repo.upsert_asset(1, "BTC", "BTC", &f, now).await.unwrap(),
            UpsertOutcome::Unchanged
        );

        let mut changed = f.clone();
        changed.withdraw_fee_fixed = dec!(0.0004);
        assert_eq!(
            repo.upsert_asset(1, "BTC", "BTC", &changed, now).await.unwrap(),
            UpsertOutcome::Updated
        );
        assert_eq!(repo.assets(1)[0].fields.withdraw_fee_fixed, dec!(0.0004));
    }

    #[tokio::test]
    async fn test_disable_keeps_row() {
        let repo = MemoryRepository::new();
        repo.upsert_asset(1, "BTC", "BTC", &fields(), Utc::now())
            .await
            .unwrap();
        let id = repo.assets(1)[0].id;
        repo.disable_asset(id, "gone").await.unwrap();

        let rows = repo.assets(1);
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].is_auto_enabled());
        assert!(repo.list_enabled_assets(1).await.unwrap().is_empty());
    }
}
