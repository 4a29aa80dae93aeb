pub mod db;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marketsync_core::*;

pub use memory::MemoryRepository;

fn db_err(e: sqlx::Error) -> RepoError {
    match e {
        sqlx::Error::Decode(inner) => RepoError::Decode(inner.to_string()),
        other => RepoError::Database(other.to_string()),
    }
}

/// A PostgreSQL-backed repository.
#[derive(Clone)]
pub struct PostgresRepository {
    pub pool: sqlx::PgPool,
}

impl PostgresRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    /// Connect and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self, RepoError> {
        let pool = sqlx::PgPool::connect(database_url).await.map_err(db_err)?;
        db::run_migrations(&pool)
            .await
            .map_err(|e| RepoError::Database(format!("Migration failed: {e}")))?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl AssetRepository for PostgresRepository {
    async fn find_asset(
        &self,
        exchange_id: i64,
        asset_code: &str,
        chain_code: &str,
    ) -> Result<Option<AssetRecord>, RepoError> {
        db::find_asset(&self.pool, exchange_id, asset_code, chain_code)
            .await
            .map_err(db_err)
    }

    async fn upsert_asset(
        &self,
        exchange_id: i64,
        asset_code: &str,
        chain_code: &str,
        fields: &AssetFields,
        synced_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome, RepoError> {
        db::upsert_asset(&self.pool, exchange_id, asset_code, chain_code, fields, synced_at)
            .await
            .map_err(db_err)
    }

    async fn list_enabled_assets(&self, exchange_id: i64) -> Result<Vec<AssetRecord>, RepoError> {
        db::list_enabled_assets(&self.pool, exchange_id)
            .await
            .map_err(db_err)
    }

    async fn disable_asset(&self, id: i64, note: &str) -> Result<(), RepoError> {
        db::disable_asset(&self.pool, id, note).await.map_err(db_err)
    }

    async fn count_assets(&self, exchange_id: i64) -> Result<i64, RepoError> {
        db::count_assets(&self.pool, exchange_id).await.map_err(db_err)
    }
}

#[async_trait]
impl ExchangeRepository for PostgresRepository {
    async fn get_exchange(&self, id: i64) -> Result<Option<Exchange>, RepoError> {
        db::get_exchange(&self.pool, id).await.map_err(db_err)
    }

    async fn list_exchanges(&self, providers: &[Provider]) -> Result<Vec<Exchange>, RepoError> {
        db::list_exchanges(&self.pool, providers).await.map_err(db_err)
    }

    async fn credentials(&self, exchange_id: i64) -> Result<Option<Credentials>, RepoError> {
        db::credentials(&self.pool, exchange_id).await.map_err(db_err)
    }

    async fn set_availability(&self, exchange_id: i64, available: bool) -> Result<bool, RepoError> {
        db::set_availability(&self.pool, exchange_id, available)
            .await
            .map_err(db_err)
    }

    async fn log_availability(&self, entry: &AvailabilityEntry) -> Result<(), RepoError> {
        db::log_availability(&self.pool, entry).await.map_err(db_err)
    }

    async fn prune_availability(&self, before: DateTime<Utc>) -> Result<u64, RepoError> {
        db::prune_availability(&self.pool, before).await.map_err(db_err)
    }

    async fn append_stats(
        &self,
        exchange_id: i64,
        snapshot: &serde_json::Value,
        stablecoin: Option<&str>,
    ) -> Result<(), RepoError> {
        db::append_stats(&self.pool, exchange_id, snapshot, stablecoin)
            .await
            .map_err(db_err)
    }
}

#[async_trait]
impl PriceRepository for PostgresRepository {
    async fn insert_price(&self, row: &PriceRow) -> Result<(), RepoError> {
        db::insert_price(&self.pool, row).await.map_err(db_err)
    }

    async fn latest_price(
        &self,
        exchange_id: i64,
        base: &str,
        quote: &str,
    ) -> Result<Option<PriceRow>, RepoError> {
        db::latest_price(&self.pool, exchange_id, base, quote)
            .await
            .map_err(db_err)
    }

    async fn upsert_latest_quote(&self, quote: &L1Quote) -> Result<(), RepoError> {
        db::upsert_latest_quote(&self.pool, quote).await.map_err(db_err)
    }
}
