mod app;
mod dump;
mod runner;
mod stats;

use anyhow::Result;
use app::App;
use clap::{ArgAction, Parser, Subcommand};
use dump::ProcessLock;
use marketsync_core::{ExchangeKind, Provider, SyncStats};
use marketsync_engine::SyncRequest;
use marketsync_health::{HealthChecker, HttpProbe};
use marketsync_prices::{Collector, Sampler};
use marketsync_providers::registry::REGISTRY;
use runner::{default_consumer, RunOptions, Runner, Task};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "marketsync")]
#[command(about = "Crypto exchange ingestion: wallet assets, L1 quotes, sampling, and availability")]
#[command(version)]
struct Cli {
    /// Verbosity (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to the TOML config file
    #[arg(long, default_value = "marketsync.toml", global = true)]
    config: PathBuf,

    /// Database URL
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Redis URL for coordination state and the quote stream
    #[arg(long, env = "REDIS_URL", global = true)]
    redis_url: Option<String>,

    /// Process lock file for the scheduler
    #[arg(long, default_value = "/tmp/marketsync.lock", global = true)]
    lock_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run collectors once or in a loop
    Run {
        /// Provider to run (repeatable; default all)
        #[arg(long = "provider", value_parser = parse_provider)]
        providers: Vec<Provider>,

        #[arg(long, value_enum, default_value = "all")]
        task: Task,

        /// Run a single pass (default)
        #[arg(long, conflicts_with = "looping")]
        once: bool,

        /// Keep running until interrupted
        #[arg(long = "loop")]
        looping: bool,

        #[arg(long)]
        dry_run: bool,

        /// Write the raw wallet payload once per UTC day
        #[arg(long)]
        dump_raw: bool,

        /// Mirror the latest quote per pair into the database
        #[arg(long)]
        admin_mirror: bool,

        /// Drain the quote stream after every pass
        #[arg(long)]
        sampler: bool,
    },

    /// Sync wallet assets through the unified engine
    SyncAssets {
        #[arg(long = "provider", value_parser = parse_provider)]
        providers: Vec<Provider>,

        #[arg(long)]
        exchange_id: Option<i64>,

        /// Fetch timeout in seconds
        #[arg(long, default_value = "20")]
        timeout: u64,

        /// Process at most this many rows (disables reconcile)
        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        no_reconcile: bool,

        #[arg(long)]
        dry_run: bool,
    },

    /// Seed the cash currency list of a rate-feed exchange (first run only)
    LoadFiat {
        /// TWELVEDATA or OPENEXCHANGERATES
        #[arg(long, value_parser = parse_provider)]
        provider: Provider,

        #[arg(long)]
        exchange_id: Option<i64>,

        #[arg(long, default_value = "20")]
        timeout: u64,
    },

    /// Collect and publish L1 quotes
    Prices {
        #[arg(long = "provider", value_parser = parse_provider)]
        providers: Vec<Provider>,

        #[arg(long)]
        exchange_id: Option<i64>,

        #[arg(long = "loop")]
        looping: bool,

        /// Seconds between passes in loop mode
        #[arg(long, default_value = "10")]
        sleep: u64,

        #[arg(long)]
        dry_run: bool,
    },

    /// Persist sampled quotes from the stream
    Sample {
        #[arg(long)]
        batch: Option<usize>,

        #[arg(long)]
        block_ms: Option<u64>,

        #[arg(long)]
        consumer: Option<String>,

        #[arg(long = "loop")]
        looping: bool,
    },

    /// Create the quote stream and consumer group
    StreamSetup,

    /// Probe provider availability
    Health {
        #[arg(long = "provider", value_parser = parse_provider)]
        providers: Vec<Provider>,

        /// Exchange kind filter (repeatable)
        #[arg(long = "kind", value_parser = parse_kind)]
        kinds: Vec<ExchangeKind>,

        #[arg(long)]
        dry_run: bool,

        /// Delete old availability history after the check
        #[arg(long)]
        prune: bool,

        #[arg(long)]
        retention_days: Option<i64>,
    },

    /// Run database migrations
    Migrate,

    /// List known providers and their capabilities
    Providers,
}

fn parse_provider(raw: &str) -> Result<Provider, String> {
    raw.parse()
}

fn parse_kind(raw: &str) -> Result<ExchangeKind, String> {
    raw.parse()
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let connect = || App::connect(&cli.config, cli.database_url.as_deref(), cli.redis_url.as_deref());

    match cli.command {
        Commands::Run {
            providers,
            task,
            once: _,
            looping,
            dry_run,
            dump_raw,
            admin_mirror,
            sampler,
        } => {
            let _lock = ProcessLock::acquire(&cli.lock_file)?;
            let app = connect().await?;
            let opts = RunOptions {
                providers,
                task,
                looping,
                dry_run,
                dump_raw,
                admin_mirror,
                sampler,
            };
            let mut runner = Runner::new(&app, opts.clone()).await?;
            if opts.looping {
                runner.run_loop().await?;
            } else {
                let outcome = runner.run_pass().await?;
                if outcome.succeeded == 0 {
                    anyhow::bail!("No provider task succeeded ({} failed)", outcome.failed);
                }
            }
        }
        Commands::SyncAssets {
            providers,
            exchange_id,
            timeout,
            limit,
            no_reconcile,
            dry_run,
        } => {
            let app = connect().await?;
            let req = |id: i64| SyncRequest {
                exchange_id: id,
                limit,
                reconcile: !no_reconcile && limit.is_none(),
                dry_run,
                timeout: Duration::from_secs(timeout.max(1)),
            };
            sync_assets(&app, &providers, exchange_id, req).await?;
        }
        Commands::LoadFiat {
            provider,
            exchange_id,
            timeout,
        } => {
            let app = connect().await?;
            load_fiat(&app, provider, exchange_id, Duration::from_secs(timeout.max(1))).await?;
        }
        Commands::Prices {
            providers,
            exchange_id,
            looping,
            sleep,
            dry_run,
        } => {
            let app = connect().await?;
            collect_prices(&app, &providers, exchange_id, looping, sleep, dry_run).await?;
        }
        Commands::Sample {
            batch,
            block_ms,
            consumer,
            looping,
        } => {
            let app = connect().await?;
            let batch = batch.unwrap_or(app.config.prices.sampler_batch);
            let block = Duration::from_millis(block_ms.unwrap_or(app.config.prices.sampler_block_ms));
            let consumer = consumer.unwrap_or_else(default_consumer);
            sample(&app, batch, block, consumer, looping).await?;
        }
        Commands::StreamSetup => {
            let app = connect().await?;
            let sampler = Sampler::new(
                app.streams.clone(),
                app.repo.clone(),
                app.config.prices.clone(),
                default_consumer(),
            );
            sampler.setup().await?;
            println!(
                "Stream {} with group {} is ready",
                app.config.prices.stream, app.config.prices.group
            );
        }
        Commands::Health {
            providers,
            kinds,
            dry_run,
            prune,
            retention_days,
        } => {
            let app = connect().await?;
            health(&app, &providers, &kinds, dry_run, prune, retention_days).await?;
        }
        Commands::Migrate => {
            let database_url = cli
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required"))?;
            let pool = sqlx::PgPool::connect(database_url).await?;
            marketsync_data::db::run_migrations(&pool)
                .await
                .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;
            println!("Migrations applied");
        }
        Commands::Providers => {
            println!("{:<18} {:<8} {:<8} {:<8} {}", "PROVIDER", "WALLET", "PRICES", "STATS", "KEYS");
            for spec in REGISTRY {
                println!(
                    "{:<18} {:<8} {:<8} {:<8} {}",
                    spec.provider.as_str(),
                    spec.wallet_assets,
                    spec.prices,
                    spec.stats,
                    if spec.needs_credentials { "required" } else { "-" }
                );
            }
        }
    }

    Ok(())
}

async fn sync_assets(
    app: &App,
    providers: &[Provider],
    exchange_id: Option<i64>,
    req: impl Fn(i64) -> SyncRequest,
) -> Result<()> {
    let engine = app.sync_engine();
    let exchanges = app.exchanges(providers, exchange_id).await?;
    if exchanges.is_empty() {
        println!("No exchanges match the filters");
        return Ok(());
    }

    for exchange in &exchanges {
        if exchange.provider == Provider::Manual {
            continue;
        }
        let label = format!("{} (#{})", exchange.provider, exchange.id);
        let adapter = match app.adapter(exchange).await {
            Ok(Some(adapter)) => adapter,
            Ok(None) => continue,
            Err(e) => {
                println!("{label}: error: {e}");
                continue;
            }
        };
        match engine.run(adapter.as_ref(), &req(exchange.id)).await {
            Ok(stats) => print_sync(&label, &stats),
            Err(e) => println!("{label}: error: {e}"),
        }
    }
    Ok(())
}

async fn load_fiat(app: &App, provider: Provider, exchange_id: Option<i64>, timeout: Duration) -> Result<()> {
    if !matches!(provider, Provider::Twelvedata | Provider::Openexchangerates) {
        anyhow::bail!("{provider} has no cash currency seed");
    }
    let exchanges = app.exchanges(&[provider], exchange_id).await?;
    if exchanges.is_empty() {
        anyhow::bail!("No {provider} exchanges match the filters");
    }

    let engine = app.sync_engine();
    let mut failed = 0usize;
    for exchange in &exchanges {
        let label = format!("{} (#{})", exchange.provider, exchange.id);
        let req = SyncRequest {
            exchange_id: exchange.id,
            limit: None,
            reconcile: false,
            dry_run: false,
            timeout,
        };
        let result = match app.adapter(exchange).await {
            Ok(Some(adapter)) => engine.run(adapter.as_ref(), &req).await.map_err(anyhow::Error::from),
            Ok(None) => Err(anyhow::anyhow!("no adapter")),
            Err(e) => Err(e),
        };
        match result {
            Ok(stats) => print_sync(&label, &stats),
            Err(e) => {
                failed += 1;
                println!("{label}: error: {e}");
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("Cash seed failed for {failed} of {} exchanges", exchanges.len());
    }
    Ok(())
}

fn print_sync(label: &str, stats: &SyncStats) {
    println!("{label}: {stats}");
}

async fn collect_prices(
    app: &App,
    providers: &[Provider],
    exchange_id: Option<i64>,
    looping: bool,
    sleep: u64,
    dry_run: bool,
) -> Result<()> {
    let publisher = app.publisher(false);
    let mut collectors: Vec<(marketsync_core::Exchange, Collector)> = Vec::new();
    for exchange in app.exchanges(providers, exchange_id).await? {
        match app.quote_source(&exchange).await {
            Ok(Some(source)) => {
                let collector = Collector::new(source, app.config.prices.symbol_cache_ttl());
                collectors.push((exchange, collector));
            }
            Ok(None) => tracing::debug!(provider = %exchange.provider, "No quote source, skipping"),
            Err(e) => println!("{} (#{}): error: {e}", exchange.provider, exchange.id),
        }
    }
    if collectors.is_empty() {
        println!("No exchanges with a quote source match the filters");
        return Ok(());
    }

    loop {
        for (exchange, collector) in collectors.iter_mut() {
            match collector.collect(exchange, &publisher, dry_run).await {
                Ok(stats) => println!(
                    "{} (#{}): pushed={} skipped={}",
                    exchange.provider, exchange.id, stats.pushed, stats.skipped
                ),
                Err(e) => println!("{} (#{}): error: {e}", exchange.provider, exchange.id),
            }
        }
        if !looping {
            return Ok(());
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(sleep.max(1))) => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

async fn sample(app: &App, batch: usize, block: Duration, consumer: String, looping: bool) -> Result<()> {
    let mut sampler = Sampler::new(
        app.streams.clone(),
        app.repo.clone(),
        app.config.prices.clone(),
        consumer,
    );
    sampler.setup().await?;
    loop {
        tokio::select! {
            result = sampler.run_once(batch, block) => {
                let stats = result?;
                if !looping {
                    println!(
                        "read={} written={} dropped={} errors={}",
                        stats.read, stats.written, stats.dropped, stats.errors
                    );
                    return Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

async fn health(
    app: &App,
    providers: &[Provider],
    kinds: &[ExchangeKind],
    dry_run: bool,
    prune: bool,
    retention_days: Option<i64>,
) -> Result<()> {
    let checker = HealthChecker::new(
        app.repo.clone(),
        Arc::new(HttpProbe::new(app.http.clone())),
        app.config.health.clone(),
    );
    let mut exchanges = app.exchanges(providers, None).await?;
    if !kinds.is_empty() {
        exchanges.retain(|e| kinds.contains(&e.kind));
    }
    exchanges.sort_by_key(|e| e.provider);

    if exchanges.is_empty() {
        println!("No exchanges match the filters");
    } else {
        let (summary, results) = checker.run(&exchanges, dry_run).await?;
        for (exchange, result) in &results {
            let (receive, send) = exchange.effective_modes();
            println!(
                "{:<12} | kind={:<9} | available={:<5} ({}) | recv={:<5} send={:<5} | {}ms",
                exchange.provider.as_str(),
                exchange.kind.as_str(),
                result.available,
                result.code,
                receive,
                send,
                result.latency_ms
            );
        }
        let head = if dry_run { "DRY-RUN" } else { "APPLIED" };
        println!(
            "[{head}] checked={} ok={} changed={}",
            summary.checked, summary.available, summary.changed
        );
    }

    if prune && !dry_run {
        let days = retention_days.unwrap_or(app.config.health.retention_days);
        let removed = checker.prune(days).await?;
        println!("[PRUNE] retention_days={days} removed={removed}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_fiat_arguments() {
        let cli = Cli::try_parse_from(["marketsync", "load-fiat", "--provider", "oxr", "--exchange-id", "7"]).unwrap();
        match cli.command {
            Commands::LoadFiat {
                provider,
                exchange_id,
                timeout,
            } => {
                assert_eq!(provider, Provider::Openexchangerates);
                assert_eq!(exchange_id, Some(7));
                assert_eq!(timeout, 20);
            }
            _ => panic!("expected load-fiat"),
        }
        assert!(Cli::try_parse_from(["marketsync", "load-fiat"]).is_err());
    }
}
