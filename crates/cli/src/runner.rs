//! The scheduler behind `marketsync run`: wallet assets, prices and stats per
//! provider, once or in a loop.

use crate::app::App;
use crate::dump::{DailyDump, TapAdapter};
use crate::stats::{stablecoin_summary, StatsSnapshot};
use anyhow::Result;
use chrono::Utc;
use clap::ValueEnum;
use marketsync_core::{Exchange, ExchangeRepository, Provider, ProviderAdapter};
use marketsync_engine::{SyncEngine, SyncRequest};
use marketsync_prices::{Collector, Publisher, Sampler};
use marketsync_providers::registry::lookup;
use rand::Rng;
use std::collections::HashMap;
use std::time::{Duration, Instant};

const ALL_PASS_PAUSE: Duration = Duration::from_secs(5);
const MIN_STATS_INTERVAL_SECS: u64 = 300;
const SAMPLER_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum Task {
    WalletAssets,
    Prices,
    Stats,
    All,
}

impl Task {
    fn expand(self) -> Vec<Task> {
        match self {
            Task::All => vec![Task::WalletAssets, Task::Prices, Task::Stats],
            task => vec![task],
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Task::WalletAssets => "wallet-assets",
            Task::Prices => "prices",
            Task::Stats => "stats",
            Task::All => "all",
        }
    }

    fn supported_by(&self, provider: Provider) -> bool {
        let spec = lookup(provider);
        match self {
            Task::WalletAssets => spec.wallet_assets,
            Task::Prices => spec.prices,
            Task::Stats => spec.stats,
            Task::All => spec.wallet_assets || spec.prices || spec.stats,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub providers: Vec<Provider>,
    pub task: Task,
    pub looping: bool,
    pub dry_run: bool,
    pub dump_raw: bool,
    pub admin_mirror: bool,
    pub sampler: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PassOutcome {
    pub succeeded: u32,
    pub failed: u32,
}

/// Default consumer name for this host.
pub fn default_consumer() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| std::process::id().to_string());
    format!("sampler-{host}")
}

pub struct Runner<'a> {
    app: &'a App,
    opts: RunOptions,
    engine: SyncEngine,
    publisher: Publisher,
    collectors: HashMap<i64, Collector>,
    sampler: Option<Sampler>,
    dump: Option<DailyDump>,
    last_run: HashMap<Task, Instant>,
}

impl<'a> Runner<'a> {
    pub async fn new(app: &'a App, opts: RunOptions) -> Result<Runner<'a>> {
        let sampler = if opts.sampler {
            let sampler = Sampler::new(
                app.streams.clone(),
                app.repo.clone(),
                app.config.prices.clone(),
                default_consumer(),
            );
            sampler.setup().await?;
            Some(sampler)
        } else {
            None
        };
        let dump = opts
            .dump_raw
            .then(|| DailyDump::new(app.config.collectors.dump_root.clone()));
        Ok(Self {
            app,
            engine: app.sync_engine(),
            publisher: app.publisher(opts.admin_mirror),
            collectors: HashMap::new(),
            sampler,
            dump,
            last_run: HashMap::new(),
            opts,
        })
    }

    fn interval(&self, task: Task) -> Duration {
        let collectors = &self.app.config.collectors;
        let secs = match task {
            Task::Prices => collectors.prices_interval_secs,
            Task::WalletAssets => collectors.wallet_interval_secs,
            Task::Stats => collectors.wallet_interval_secs.max(MIN_STATS_INTERVAL_SECS),
            Task::All => ALL_PASS_PAUSE.as_secs(),
        };
        Duration::from_secs(secs.max(1))
    }

    fn due_tasks(&self) -> Vec<Task> {
        self.opts
            .task
            .expand()
            .into_iter()
            .filter(|task| {
                self.last_run
                    .get(task)
                    .map_or(true, |at| at.elapsed() >= self.interval(*task))
            })
            .collect()
    }

    /// Run every due task once for every selected exchange.
    pub async fn run_pass(&mut self) -> Result<PassOutcome> {
        let tasks = self.due_tasks();
        let mut outcome = PassOutcome::default();
        if tasks.is_empty() {
            return Ok(outcome);
        }
        let exchanges = self.app.exchanges(&self.opts.providers, None).await?;
        let run_id = uuid::Uuid::new_v4();
        tracing::info!(%run_id, exchanges = exchanges.len(), tasks = ?tasks, "Pass started");

        for exchange in &exchanges {
            let mut tap: Option<TapAdapter> = None;
            let mut first = true;
            for task in &tasks {
                if !task.supported_by(exchange.provider) {
                    continue;
                }
                if !first {
                    let pause = rand::thread_rng().gen_range(800..=1200);
                    tokio::time::sleep(Duration::from_millis(pause)).await;
                }
                first = false;

                let result = match task {
                    Task::WalletAssets => self.wallet(exchange, &mut tap).await,
                    Task::Prices => self.prices(exchange).await,
                    Task::Stats => self.stats(exchange, &mut tap).await,
                    Task::All => Ok(()),
                };
                match result {
                    Ok(()) => outcome.succeeded += 1,
                    Err(e) => {
                        outcome.failed += 1;
                        tracing::error!(
                            provider = %exchange.provider,
                            exchange_id = exchange.id,
                            task = task.as_str(),
                            error = %e,
                            "Task failed"
                        );
                    }
                }
            }
        }

        let now = Instant::now();
        for task in tasks {
            self.last_run.insert(task, now);
        }

        if let Some(sampler) = self.sampler.as_mut() {
            let batch = self.app.config.prices.sampler_batch;
            if let Err(e) = sampler.run_once(batch, SAMPLER_POLL).await {
                tracing::error!(error = %e, "Sampler pass failed");
            }
        }

        tracing::info!(%run_id, succeeded = outcome.succeeded, failed = outcome.failed, "Pass finished");
        Ok(outcome)
    }

    /// Loop until Ctrl-C.
    pub async fn run_loop(&mut self) -> Result<()> {
        let pause = if self.opts.task == Task::All {
            ALL_PASS_PAUSE
        } else {
            self.interval(self.opts.task)
        };
        loop {
            self.run_pass().await?;
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupted, stopping");
                    return Ok(());
                }
            }
        }
    }

    async fn tap<'t>(&self, exchange: &Exchange, tap: &'t mut Option<TapAdapter>) -> Result<&'t TapAdapter> {
        if tap.is_none() {
            let adapter = self
                .app
                .adapter(exchange)
                .await?
                .ok_or_else(|| anyhow::anyhow!("{} has no wallet adapter", exchange.provider))?;
            *tap = Some(TapAdapter::new(adapter, self.dump.clone()));
        }
        tap.as_ref()
            .ok_or_else(|| anyhow::anyhow!("{} adapter unavailable", exchange.provider))
    }

    async fn wallet(&self, exchange: &Exchange, tap: &mut Option<TapAdapter>) -> Result<()> {
        let adapter = self.tap(exchange, tap).await?;
        let req = SyncRequest {
            dry_run: self.opts.dry_run,
            ..SyncRequest::full(exchange.id, self.app.config.sync.timeout())
        };
        let stats = self.engine.run(adapter, &req).await?;
        tracing::info!(provider = %exchange.provider, exchange_id = exchange.id, %stats, "Wallet assets synced");
        Ok(())
    }

    async fn prices(&mut self, exchange: &Exchange) -> Result<()> {
        if !self.collectors.contains_key(&exchange.id) {
            let source = self
                .app
                .quote_source(exchange)
                .await?
                .ok_or_else(|| anyhow::anyhow!("{} has no quote source", exchange.provider))?;
            let collector = Collector::new(source, self.app.config.prices.symbol_cache_ttl());
            self.collectors.insert(exchange.id, collector);
        }
        let Some(collector) = self.collectors.get_mut(&exchange.id) else {
            return Ok(());
        };
        collector
            .collect(exchange, &self.publisher, self.opts.dry_run)
            .await?;
        Ok(())
    }

    async fn stats(&self, exchange: &Exchange, tap: &mut Option<TapAdapter>) -> Result<()> {
        let adapter = self.tap(exchange, tap).await?;
        let timeout = self.app.config.sync.timeout();
        let wallet = match adapter.last_rows() {
            Some(rows) => rows,
            None => {
                let payload = adapter.fetch_payload(timeout).await?;
                adapter.iter_rows(&payload)?
            }
        };
        let markets = match self.app.quote_source(exchange).await {
            Ok(Some(source)) => source.symbols(timeout).await.unwrap_or_else(|e| {
                tracing::warn!(provider = %exchange.provider, error = %e, "Markets unavailable for stats");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(provider = %exchange.provider, error = %e, "No quote source for stats");
                Vec::new()
            }
        };

        let snapshot = StatsSnapshot::compute(&wallet, &markets, Utc::now());
        let stablecoin = stablecoin_summary(&markets, &self.app.config.reference_lists());
        tracing::info!(
            provider = %exchange.provider,
            exchange_id = exchange.id,
            wallet_coins = snapshot.wallet_coins,
            market_coins = snapshot.market_coins,
            coverage_pct = %snapshot.coverage_pct,
            "Stats computed"
        );
        if !self.opts.dry_run {
            let value = serde_json::to_value(&snapshot)?;
            self.app
                .repo
                .append_stats(exchange.id, &value, stablecoin.as_deref())
                .await?;
        }
        Ok(())
    }
}
