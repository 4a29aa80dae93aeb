//! Hot key and stream publication of L1 quotes.
//!
//! Every quote lands in two places: a JSON string under the hot key with a
//! venue-dependent TTL, and one flat entry in the capped updates stream. The
//! hot key's provider slot is the exchange id.

use crate::CollectError;
use chrono::{DateTime, Utc};
use marketsync_cache::{CoordinationStore, StreamStore};
use marketsync_core::{L1Quote, PriceRepository, PriceRow, PriceSettings, Provider, VenueType};
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

pub const STATUS_OK: &str = "OK";

fn opt(value: Option<Decimal>) -> String {
    value.map(|d| d.to_string()).unwrap_or_default()
}

/// Flat string fields shared by the hot payload and the stream entry.
pub fn quote_fields(quote: &L1Quote, ts_ingest_ms: i64) -> Vec<(String, String)> {
    let latency_ms = (ts_ingest_ms - quote.ts_src_ms).max(0);
    [
        ("provider_id", quote.exchange_id.to_string()),
        ("provider", quote.provider.as_str().to_string()),
        ("venue_type", quote.venue.as_str().to_string()),
        ("base", quote.base.clone()),
        ("quote", quote.quote.clone()),
        ("bid", quote.bid.to_string()),
        ("ask", quote.ask.to_string()),
        ("last", opt(quote.last)),
        ("ts_src_ms", quote.ts_src_ms.to_string()),
        ("ts_ingest_ms", ts_ingest_ms.to_string()),
        ("status", STATUS_OK.to_string()),
        ("latency_ms", latency_ms.to_string()),
        ("src_symbol", quote.src_symbol.clone()),
        ("extras", quote.extras.to_string()),
        ("fee_taker_bps", opt(quote.fee_taker_bps)),
        ("fee_maker_bps", opt(quote.fee_maker_bps)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

pub struct Publisher {
    store: Arc<dyn CoordinationStore>,
    streams: Arc<dyn StreamStore>,
    settings: PriceSettings,
    mirror: Option<Arc<dyn PriceRepository>>,
}

impl Publisher {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        streams: Arc<dyn StreamStore>,
        settings: PriceSettings,
    ) -> Self {
        Self {
            store,
            streams,
            settings,
            mirror: None,
        }
    }

    /// Also keep the latest quote per pair in the database.
    pub fn with_mirror(mut self, repo: Arc<dyn PriceRepository>) -> Self {
        self.mirror = Some(repo);
        self
    }

    pub fn hot_key(&self, quote: &L1Quote) -> String {
        self.settings
            .hot_key(&quote.exchange_id.to_string(), &quote.base, &quote.quote)
    }

    /// Publish one quote. Returns the stream entry id.
    pub async fn publish(&self, quote: &L1Quote) -> Result<String, CollectError> {
        let fields = quote_fields(quote, Utc::now().timestamp_millis());
        let payload: serde_json::Map<String, Value> = fields
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();

        self.store
            .set(
                &self.hot_key(quote),
                &Value::Object(payload).to_string(),
                Some(self.settings.ttl_for(quote.venue)),
            )
            .await?;
        let id = self
            .streams
            .append(&self.settings.stream, &fields, self.settings.stream_maxlen)
            .await?;

        if let Some(repo) = &self.mirror {
            repo.upsert_latest_quote(quote).await?;
        }
        Ok(id)
    }
}

/// A decoded stream entry.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteEvent {
    pub venue: VenueType,
    pub row: PriceRow,
}

fn field<'a>(fields: &'a HashMap<String, String>, name: &str) -> Result<&'a str, CollectError> {
    fields
        .get(name)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CollectError::Event(format!("missing {name}")))
}

fn decimal(fields: &HashMap<String, String>, name: &str) -> Result<Decimal, CollectError> {
    let raw = field(fields, name)?;
    Decimal::from_str(raw).map_err(|e| CollectError::Event(format!("{name}={raw}: {e}")))
}

fn optional_decimal(fields: &HashMap<String, String>, name: &str) -> Option<Decimal> {
    field(fields, name).ok().and_then(|raw| Decimal::from_str(raw).ok())
}

fn int(fields: &HashMap<String, String>, name: &str) -> Result<i64, CollectError> {
    let raw = field(fields, name)?;
    raw.parse::<i64>()
        .map_err(|e| CollectError::Event(format!("{name}={raw}: {e}")))
}

fn timestamp(ms: i64) -> Result<DateTime<Utc>, CollectError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| CollectError::Event(format!("timestamp out of range: {ms}")))
}

impl QuoteEvent {
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, CollectError> {
        let provider = Provider::from_str(field(fields, "provider")?).map_err(CollectError::Event)?;
        let venue = field(fields, "venue_type")
            .ok()
            .and_then(|v| VenueType::from_str(v).ok())
            .unwrap_or(VenueType::Cex);
        let ts_src_ms = int(fields, "ts_src_ms")?;
        let ts_ingest_ms = int(fields, "ts_ingest_ms").unwrap_or(ts_src_ms);
        let extras = field(fields, "extras")
            .ok()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_else(|| Value::Object(Default::default()));

        let row = PriceRow {
            exchange_id: int(fields, "provider_id")?,
            provider,
            src_symbol: fields.get("src_symbol").cloned().unwrap_or_default(),
            base: field(fields, "base")?.to_ascii_uppercase(),
            quote: field(fields, "quote")?.to_ascii_uppercase(),
            bid: decimal(fields, "bid")?,
            ask: decimal(fields, "ask")?,
            last: optional_decimal(fields, "last"),
            fee_taker_bps: optional_decimal(fields, "fee_taker_bps"),
            fee_maker_bps: optional_decimal(fields, "fee_maker_bps"),
            ts_src: timestamp(ts_src_ms)?,
            ts_ingest: timestamp(ts_ingest_ms)?,
            latency_ms: int(fields, "latency_ms")
                .unwrap_or(0)
                .clamp(0, i64::from(i32::MAX)) as i32,
            status: field(fields, "status").unwrap_or(STATUS_OK).to_string(),
            extras,
        };
        Ok(Self { venue, row })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketsync_cache::MemoryStore;
    use marketsync_data::MemoryRepository;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::time::Duration;

    fn quote(base: &str, bid: Decimal, ask: Decimal, ts_src_ms: i64) -> L1Quote {
        L1Quote {
            exchange_id: 3,
            provider: Provider::Bybit,
            venue: VenueType::Cex,
            base: base.into(),
            quote: "USDT".into(),
            bid,
            ask,
            last: None,
            ts_src_ms,
            src_symbol: format!("{base}USDT"),
            fee_taker_bps: None,
            fee_maker_bps: None,
            extras: json!({"v": "v5"}),
        }
    }

    #[tokio::test]
    async fn test_publish_sets_hot_key_and_one_entry() {
        let store = Arc::new(MemoryStore::new());
        let settings = PriceSettings::default();
        let publisher = Publisher::new(store.clone(), store.clone(), settings.clone());
        let q = quote("BTC", dec!(100), dec!(101), Utc::now().timestamp_millis());

        publisher.publish(&q).await.unwrap();

        let key = "price:l1:3:BTC:USDT";
        let raw = store.get(key).await.unwrap().unwrap();
        let payload: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(payload["bid"], "100");
        assert_eq!(payload["ask"], "101");
        assert_eq!(payload["status"], "OK");

        let ttl = store.ttl(key).await.unwrap().unwrap();
        assert!(ttl <= Duration::from_secs(10) && ttl > Duration::from_secs(8));
        assert_eq!(store.stream_len(&settings.stream).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_mirror_keeps_latest_only() {
        let store = Arc::new(MemoryStore::new());
        let repo = Arc::new(MemoryRepository::new());
        let publisher = Publisher::new(store.clone(), store.clone(), PriceSettings::default())
            .with_mirror(repo.clone());

        publisher.publish(&quote("BTC", dec!(100), dec!(101), 1)).await.unwrap();
        publisher.publish(&quote("BTC", dec!(102), dec!(103), 2)).await.unwrap();

        let latest = repo.latest_quotes();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].bid, dec!(102));
    }

    #[test]
    fn test_event_round_trip_fields() {
        let q = quote("ETH", dec!(3000), dec!(3001), 1_700_000_000_000);
        let fields: HashMap<String, String> = quote_fields(&q, 1_700_000_000_250).into_iter().collect();

        let event = QuoteEvent::from_fields(&fields).unwrap();
        assert_eq!(event.venue, VenueType::Cex);
        assert_eq!(event.row.exchange_id, 3);
        assert_eq!(event.row.provider, Provider::Bybit);
        assert_eq!(event.row.latency_ms, 250);
        assert_eq!(event.row.last, None);
        assert_eq!(event.row.mid(), Some(dec!(3000.5)));
        assert_eq!(event.row.extras, json!({"v": "v5"}));
    }

    #[test]
    fn test_event_missing_price_is_error() {
        let mut fields: HashMap<String, String> =
            quote_fields(&quote("ETH", dec!(1), dec!(2), 1), 1).into_iter().collect();
        fields.insert("bid".into(), "abc".into());
        assert!(matches!(
            QuoteEvent::from_fields(&fields),
            Err(CollectError::Event(_))
        ));
    }
}
