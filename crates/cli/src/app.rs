//! Shared wiring: config, database, coordination store, HTTP client.

use anyhow::Result;
use marketsync_cache::{CoordinationStore, MemoryStore, RedisStore, StreamStore};
use marketsync_core::{AppConfig, Credentials, Exchange, ExchangeRepository, Provider, ProviderAdapter};
use marketsync_data::PostgresRepository;
use marketsync_engine::{Normalizer, RetryPolicy, SyncEngine};
use marketsync_prices::{build_source, Publisher, QuoteSource};
use marketsync_providers::registry::lookup;
use marketsync_providers::{build_adapter, AdapterContext, HttpClient};
use std::path::Path;
use std::sync::Arc;

pub struct App {
    pub config: AppConfig,
    pub repo: Arc<PostgresRepository>,
    pub store: Arc<dyn CoordinationStore>,
    pub streams: Arc<dyn StreamStore>,
    pub http: HttpClient,
}

impl App {
    pub async fn connect(
        config_path: &Path,
        database_url: Option<&str>,
        redis_url: Option<&str>,
    ) -> Result<Self> {
        let config = AppConfig::load(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to load {}: {e}", config_path.display()))?;

        let database_url = database_url
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required (flag --database-url or env)"))?;
        let repo = PostgresRepository::connect(database_url)
            .await
            .map_err(|e| anyhow::anyhow!("Database connection failed: {e}"))?;

        let store: Arc<dyn CoordinationStore>;
        let streams: Arc<dyn StreamStore>;
        match redis_url {
            Some(url) => {
                let redis = Arc::new(
                    RedisStore::connect(url)
                        .await
                        .map_err(|e| anyhow::anyhow!("Redis connection failed: {e}"))?,
                );
                store = redis.clone();
                streams = redis;
            }
            None => {
                tracing::warn!("REDIS_URL not set, coordination state is process-local");
                let memory = Arc::new(MemoryStore::new());
                store = memory.clone();
                streams = memory;
            }
        }

        let http = HttpClient::new().map_err(|e| anyhow::anyhow!("{e}"))?;
        Ok(Self {
            config,
            repo: Arc::new(repo),
            store,
            streams,
            http,
        })
    }

    /// Exchanges for the given providers (all when empty), skipping providers
    /// disabled in config.
    pub async fn exchanges(&self, providers: &[Provider], exchange_id: Option<i64>) -> Result<Vec<Exchange>> {
        let mut exchanges = self.repo.list_exchanges(providers).await?;
        exchanges.retain(|e| self.config.provider(e.provider).enabled);
        if let Some(id) = exchange_id {
            exchanges.retain(|e| e.id == id);
        }
        Ok(exchanges)
    }

    /// Stored API keys first, then the config file.
    pub async fn credentials(&self, exchange: &Exchange) -> Result<Option<Credentials>> {
        if let Some(credentials) = self.repo.credentials(exchange.id).await? {
            return Ok(Some(credentials));
        }
        Ok(self.config.provider(exchange.provider).credentials())
    }

    /// `Ok(None)` when the provider has no wallet adapter.
    pub async fn adapter(&self, exchange: &Exchange) -> Result<Option<Box<dyn ProviderAdapter>>> {
        if !lookup(exchange.provider).wallet_assets {
            return Ok(None);
        }
        let ctx = AdapterContext {
            http: self.http.clone(),
            credentials: self.credentials(exchange).await?,
            settings: self.config.provider(exchange.provider),
        };
        Ok(build_adapter(exchange.provider, ctx)?)
    }

    /// `Ok(None)` when the provider publishes no prices.
    pub async fn quote_source(&self, exchange: &Exchange) -> Result<Option<Box<dyn QuoteSource>>> {
        if !lookup(exchange.provider).prices {
            return Ok(None);
        }
        let credentials = self.credentials(exchange).await?;
        Ok(build_source(exchange.provider, self.http.clone(), credentials)?)
    }

    pub fn sync_engine(&self) -> SyncEngine {
        SyncEngine::new(self.store.clone(), self.repo.clone(), self.config.sync.clone())
            .with_retry(RetryPolicy::from_settings(&self.config.retry))
            .with_normalizer(Normalizer::new(
                self.config.reference_lists(),
                self.config.guard_bounds(),
            ))
    }

    pub fn publisher(&self, admin_mirror: bool) -> Publisher {
        let publisher = Publisher::new(
            self.store.clone(),
            self.streams.clone(),
            self.config.prices.clone(),
        );
        if admin_mirror {
            publisher.with_mirror(self.repo.clone())
        } else {
            publisher
        }
    }
}
