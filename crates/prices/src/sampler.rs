//! Durable sampling of the quote stream.
//!
//! Every message is acknowledged once handled, whatever the outcome, so a
//! poison entry never stalls the group. A point is written when the interval
//! since the last stored point has passed or the mid moved enough.

use crate::publisher::QuoteEvent;
use crate::CollectError;
use chrono::{DateTime, Utc};
use marketsync_cache::{StreamMessage, StreamStore};
use marketsync_core::{PriceRepository, PriceSettings, VenueType};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SampleStats {
    pub read: u64,
    pub written: u64,
    pub dropped: u64,
    pub errors: u64,
}

type PairKey = (i64, String, String);

/// Last stored point for a pair: source time and mid.
type LastPoint = (DateTime<Utc>, Decimal);

pub struct Sampler {
    streams: Arc<dyn StreamStore>,
    prices: Arc<dyn PriceRepository>,
    settings: PriceSettings,
    consumer: String,
    last_saved: HashMap<PairKey, LastPoint>,
}

impl Sampler {
    pub fn new(
        streams: Arc<dyn StreamStore>,
        prices: Arc<dyn PriceRepository>,
        settings: PriceSettings,
        consumer: impl Into<String>,
    ) -> Self {
        Self {
            streams,
            prices,
            settings,
            consumer: consumer.into(),
            last_saved: HashMap::new(),
        }
    }

    /// Create the stream and group if needed.
    pub async fn setup(&self) -> Result<(), CollectError> {
        self.streams
            .ensure_group(&self.settings.stream, &self.settings.group)
            .await?;
        Ok(())
    }

    /// Whether a point at `ts` with `mid` should be stored after `prev`.
    pub fn should_sample(
        &self,
        venue: VenueType,
        prev: Option<LastPoint>,
        ts: DateTime<Utc>,
        mid: Decimal,
    ) -> bool {
        let Some((prev_ts, prev_mid)) = prev else {
            return true;
        };
        let interval = *self.settings.sample_interval_secs.get(venue) as i64;
        if (ts - prev_ts).num_seconds() >= interval {
            return true;
        }
        if prev_mid <= Decimal::ZERO {
            return false;
        }
        let moved_pct = mid
            .checked_sub(prev_mid)
            .and_then(|delta| delta.checked_div(prev_mid))
            .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED));
        match moved_pct {
            Some(pct) => pct.abs() >= *self.settings.sample_delta_pct.get(venue),
            // Too large to represent, so past any threshold.
            None => true,
        }
    }

    async fn last_point(&mut self, key: &PairKey) -> Result<Option<LastPoint>, CollectError> {
        if let Some(point) = self.last_saved.get(key) {
            return Ok(Some(*point));
        }
        let latest = self.prices.latest_price(key.0, &key.1, &key.2).await?;
        let point = latest.and_then(|row| row.mid().map(|mid| (row.ts_src, mid)));
        if let Some(point) = point {
            self.last_saved.insert(key.clone(), point);
        }
        Ok(point)
    }

    /// True when a row was written, false when the event was dropped.
    async fn process(&mut self, message: &StreamMessage) -> Result<bool, CollectError> {
        let event = QuoteEvent::from_fields(&message.fields)?;
        let row = event.row;
        if !row.is_sane() {
            return Ok(false);
        }
        let Some(mid) = row.mid() else {
            return Ok(false);
        };

        let key = (row.exchange_id, row.base.clone(), row.quote.clone());
        let prev = self.last_point(&key).await?;
        if !self.should_sample(event.venue, prev, row.ts_src, mid) {
            return Ok(false);
        }

        self.prices.insert_price(&row).await?;
        self.last_saved.insert(key, (row.ts_src, mid));
        Ok(true)
    }

    /// Read one batch and handle it.
    pub async fn run_once(&mut self, batch: usize, block: Duration) -> Result<SampleStats, CollectError> {
        let stream = self.settings.stream.clone();
        let group = self.settings.group.clone();
        let messages = self
            .streams
            .read_group(&stream, &group, &self.consumer, batch.max(1), block)
            .await?;

        let mut stats = SampleStats {
            read: messages.len() as u64,
            ..Default::default()
        };

        for message in &messages {
            match self.process(message).await {
                Ok(true) => stats.written += 1,
                Ok(false) => stats.dropped += 1,
                Err(e) => {
                    tracing::warn!(id = %message.id, error = %e, "Quote event failed");
                    stats.errors += 1;
                }
            }
            if let Err(e) = self.streams.ack(&stream, &group, &message.id).await {
                tracing::warn!(id = %message.id, error = %e, "Failed to ack quote event");
            }
        }

        if stats.read > 0 {
            tracing::info!(
                read = stats.read,
                written = stats.written,
                dropped = stats.dropped,
                errors = stats.errors,
                "Sampler batch done"
            );
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::Publisher;
    use marketsync_cache::MemoryStore;
    use marketsync_core::numeric::AMOUNT_CAP;
    use marketsync_core::{L1Quote, PriceRow, Provider, RepoError};
    use marketsync_data::MemoryRepository;
    use rust_decimal_macros::dec;

    const T0: i64 = 1_700_000_000_000;

    fn quote(bid: Decimal, ask: Decimal, ts_src_ms: i64) -> L1Quote {
        L1Quote {
            exchange_id: 3,
            provider: Provider::Bybit,
            venue: VenueType::Cex,
            base: "BTC".into(),
            quote: "USDT".into(),
            bid,
            ask,
            last: None,
            ts_src_ms,
            src_symbol: "BTCUSDT".into(),
            fee_taker_bps: None,
            fee_maker_bps: None,
            extras: serde_json::json!({}),
        }
    }

    fn setup() -> (Arc<MemoryStore>, Arc<MemoryRepository>, Publisher, Sampler) {
        let store = Arc::new(MemoryStore::new());
        let repo = Arc::new(MemoryRepository::new());
        let settings = PriceSettings::default();
        let publisher = Publisher::new(store.clone(), store.clone(), settings.clone());
        let sampler = Sampler::new(store.clone(), repo.clone(), settings, "sampler-test");
        (store, repo, publisher, sampler)
    }

    #[tokio::test]
    async fn test_hundred_quiet_events_store_one_row() {
        let (store, repo, publisher, mut sampler) = setup();
        sampler.setup().await.unwrap();

        // 100 events within 10s, mid drifting by at most 0.099%.
        for i in 0..100 {
            let bump = Decimal::from(i) / dec!(10000);
            let q = quote(dec!(100) + bump, dec!(101) + bump, T0 + i * 100);
            publisher.publish(&q).await.unwrap();
        }
        let stats = sampler.run_once(500, Duration::ZERO).await.unwrap();
        assert_eq!(stats.read, 100);
        assert_eq!(stats.written, 1);
        assert_eq!(stats.dropped, 99);
        assert_eq!(repo.prices().len(), 1);

        // A 1% move inside the interval is stored.
        publisher
            .publish(&quote(dec!(101), dec!(102), T0 + 11_000))
            .await
            .unwrap();
        let stats = sampler.run_once(500, Duration::ZERO).await.unwrap();
        assert_eq!(stats.written, 1);
        assert_eq!(repo.prices().len(), 2);

        assert_eq!(store.pending_count("prices:l1:updates", "sampler"), 0);
    }

    #[tokio::test]
    async fn test_interval_elapsed_stores_again() {
        let (_, repo, publisher, mut sampler) = setup();
        sampler.setup().await.unwrap();

        publisher.publish(&quote(dec!(100), dec!(101), T0)).await.unwrap();
        publisher
            .publish(&quote(dec!(100), dec!(101), T0 + 15_000))
            .await
            .unwrap();
        let stats = sampler.run_once(500, Duration::ZERO).await.unwrap();
        assert_eq!(stats.written, 2);
        assert_eq!(repo.prices().len(), 2);
    }

    #[tokio::test]
    async fn test_last_point_falls_back_to_database() {
        let (_, repo, publisher, mut sampler) = setup();
        sampler.setup().await.unwrap();
        publisher.publish(&quote(dec!(100), dec!(101), T0)).await.unwrap();
        sampler.run_once(500, Duration::ZERO).await.unwrap();

        // A fresh sampler has an empty cache but sees the stored row.
        let mut restarted = Sampler::new(
            sampler.streams.clone(),
            repo.clone(),
            PriceSettings::default(),
            "sampler-test-2",
        );
        publisher
            .publish(&quote(dec!(100.01), dec!(101.01), T0 + 1_000))
            .await
            .unwrap();
        let stats = restarted.run_once(500, Duration::ZERO).await.unwrap();
        assert_eq!(stats.dropped, 1);
        assert_eq!(repo.prices().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_events_are_acked() {
        let (store, repo, _, mut sampler) = setup();
        sampler.setup().await.unwrap();
        store
            .append(
                "prices:l1:updates",
                &[("provider".to_string(), "BYBIT".to_string())],
                1000,
            )
            .await
            .unwrap();

        let stats = sampler.run_once(500, Duration::ZERO).await.unwrap();
        assert_eq!(stats.errors, 1);
        assert!(repo.prices().is_empty());
        assert_eq!(store.pending_count("prices:l1:updates", "sampler"), 0);
    }

    #[tokio::test]
    async fn test_prices_beyond_cap_are_dropped_and_acked() {
        let (store, repo, publisher, mut sampler) = setup();
        sampler.setup().await.unwrap();

        publisher
            .publish(&quote(Decimal::MAX, Decimal::MAX, T0))
            .await
            .unwrap();
        let stats = sampler.run_once(500, Duration::ZERO).await.unwrap();
        assert_eq!(stats.dropped, 1);
        assert!(repo.prices().is_empty());

        publisher
            .publish(&quote(AMOUNT_CAP, AMOUNT_CAP, T0 + 1_000))
            .await
            .unwrap();
        let stats = sampler.run_once(500, Duration::ZERO).await.unwrap();
        assert_eq!(stats.written, 1);
        assert_eq!(repo.prices()[0].bid, AMOUNT_CAP);
        assert_eq!(store.pending_count("prices:l1:updates", "sampler"), 0);
    }

    #[tokio::test]
    async fn test_huge_move_from_tiny_mid_is_stored() {
        let (_, repo, publisher, mut sampler) = setup();
        sampler.setup().await.unwrap();

        publisher
            .publish(&quote(Decimal::new(1, 28), Decimal::new(1, 28), T0))
            .await
            .unwrap();
        publisher
            .publish(&quote(dec!(100000000), dec!(100000000), T0 + 1_000))
            .await
            .unwrap();
        let stats = sampler.run_once(500, Duration::ZERO).await.unwrap();
        assert_eq!(stats.written, 2);
        assert_eq!(repo.prices().len(), 2);
    }

    #[tokio::test]
    async fn test_crossed_event_is_dropped_and_acked() {
        let (store, repo, publisher, mut sampler) = setup();
        sampler.setup().await.unwrap();

        publisher.publish(&quote(dec!(101), dec!(100), T0)).await.unwrap();
        publisher.publish(&quote(dec!(-1), dec!(5), T0)).await.unwrap();
        let stats = sampler.run_once(500, Duration::ZERO).await.unwrap();
        assert_eq!(stats.read, 2);
        assert_eq!(stats.dropped, 2);
        assert!(repo.prices().is_empty());
        assert_eq!(store.pending_count("prices:l1:updates", "sampler"), 0);
    }

    struct BrokenPrices;

    #[async_trait::async_trait]
    impl PriceRepository for BrokenPrices {
        async fn insert_price(&self, _row: &PriceRow) -> Result<(), RepoError> {
            Err(RepoError::Database("connection reset".into()))
        }

        async fn latest_price(
            &self,
            _exchange_id: i64,
            _base: &str,
            _quote: &str,
        ) -> Result<Option<PriceRow>, RepoError> {
            Ok(None)
        }

        async fn upsert_latest_quote(&self, _quote: &L1Quote) -> Result<(), RepoError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_insert_is_still_acked() {
        let store = Arc::new(MemoryStore::new());
        let settings = PriceSettings::default();
        let publisher = Publisher::new(store.clone(), store.clone(), settings.clone());
        let mut sampler = Sampler::new(store.clone(), Arc::new(BrokenPrices), settings, "sampler-test");
        sampler.setup().await.unwrap();

        publisher.publish(&quote(dec!(100), dec!(101), T0)).await.unwrap();
        publisher.publish(&quote(dec!(200), dec!(201), T0 + 1)).await.unwrap();
        let stats = sampler.run_once(500, Duration::ZERO).await.unwrap();
        assert_eq!(stats.errors, 2);
        assert_eq!(stats.written, 0);
        assert_eq!(store.pending_count("prices:l1:updates", "sampler"), 0);
    }
}
