use crate::publisher::Publisher;
use crate::source::{QuoteSource, Ticker};
use crate::CollectError;
use chrono::Utc;
use marketsync_core::{Exchange, L1Quote, MarketPair, ProviderError};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of one collection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectStats {
    pub pushed: u64,
    pub skipped: u64,
}

/// Symbol → pair map, refreshed at most once per TTL.
pub struct SymbolCache {
    ttl: Duration,
    loaded: Option<(Instant, Arc<HashMap<String, MarketPair>>)>,
}

impl SymbolCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, loaded: None }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(&self.loaded, Some((at, map)) if at.elapsed() < self.ttl && !map.is_empty())
    }

    pub async fn get(
        &mut self,
        source: &dyn QuoteSource,
        timeout: Duration,
    ) -> Result<Arc<HashMap<String, MarketPair>>, ProviderError> {
        if let Some((_, map)) = self.loaded.as_ref().filter(|_| self.is_fresh()) {
            return Ok(map.clone());
        }
        let map: HashMap<String, MarketPair> = source
            .symbols(timeout)
            .await?
            .into_iter()
            .map(|pair| (pair.symbol.clone(), pair))
            .collect();
        tracing::debug!(provider = %source.provider(), symbols = map.len(), "Symbol map refreshed");
        let map = Arc::new(map);
        self.loaded = Some((Instant::now(), map.clone()));
        Ok(map)
    }

    pub fn invalidate(&mut self) {
        self.loaded = None;
    }
}

/// Polls one provider's tickers and publishes every sane quote.
pub struct Collector {
    source: Box<dyn QuoteSource>,
    symbols: SymbolCache,
    timeout: Duration,
}

impl Collector {
    pub fn new(source: Box<dyn QuoteSource>, symbol_ttl: Duration) -> Self {
        Self {
            source,
            symbols: SymbolCache::new(symbol_ttl),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn to_quote(exchange: &Exchange, pair: &MarketPair, ticker: &Ticker, now_ms: i64) -> Option<L1Quote> {
        let quote = L1Quote {
            exchange_id: exchange.id,
            provider: exchange.provider,
            venue: exchange.kind.venue_type(),
            base: pair.base.clone(),
            quote: pair.quote.clone(),
            bid: ticker.bid?,
            ask: ticker.ask?,
            last: ticker.last,
            ts_src_ms: ticker.ts_ms.unwrap_or(now_ms),
            src_symbol: ticker.symbol.clone(),
            fee_taker_bps: ticker.fee_taker_bps,
            fee_maker_bps: None,
            extras: if ticker.synthetic {
                serde_json::json!({ "source": exchange.provider.slug(), "synthetic_bbo": true })
            } else {
                serde_json::json!({ "source": exchange.provider.slug() })
            },
        };
        quote.is_sane().then_some(quote)
    }

    /// One pass. Unknown symbols and unusable quotes are counted as skipped.
    pub async fn collect(
        &mut self,
        exchange: &Exchange,
        publisher: &Publisher,
        dry_run: bool,
    ) -> Result<CollectStats, CollectError> {
        let symbols = self.symbols.get(self.source.as_ref(), self.timeout).await?;
        let tickers = self.source.tickers(self.timeout).await?;
        let now_ms = Utc::now().timestamp_millis();
        let mut stats = CollectStats::default();

        for ticker in &tickers {
            let Some(pair) = symbols.get(&ticker.symbol) else {
                stats.skipped += 1;
                continue;
            };
            let Some(quote) = Self::to_quote(exchange, pair, ticker, now_ms) else {
                stats.skipped += 1;
                continue;
            };
            if !dry_run {
                publisher.publish(&quote).await?;
            }
            stats.pushed += 1;
        }

        tracing::info!(
            provider = %exchange.provider,
            exchange_id = exchange.id,
            pushed = stats.pushed,
            skipped = stats.skipped,
            dry_run,
            "Prices collected"
        );
        Ok(stats)
    }
}
