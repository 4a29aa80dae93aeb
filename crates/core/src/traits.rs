use crate::models::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Provider Adapter Trait
// ---------------------------------------------------------------------------

/// How the sync engine should react to a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Permanent for this pass (bad credentials, malformed payload).
    Never,
    /// Transient; follow the backoff ladder.
    WithBackoff,
    /// Transient and the provider asked us to wait this long.
    RetryAfter(Duration),
}

/// Errors raised while fetching or decoding provider payloads.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP {status}: {body}")]
    Http {
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request timed out")]
    Timeout,
    #[error("Missing credentials for {0}")]
    MissingCredentials(Provider),
    #[error("API error: {0}")]
    Api(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Signing error: {0}")]
    Signing(String),
}

impl ProviderError {
    /// Retry policy for this error. Rate limits and server errors are
    /// retried; other HTTP statuses and local failures are not.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            ProviderError::Http {
                status,
                retry_after,
                ..
            } if *status == 429 || *status >= 500 => match retry_after {
                Some(wait) => RetryClass::RetryAfter(*wait),
                None => RetryClass::WithBackoff,
            },
            ProviderError::Http { .. } => RetryClass::Never,
            ProviderError::Network(_) | ProviderError::Timeout | ProviderError::Api(_) => {
                RetryClass::WithBackoff
            }
            ProviderError::MissingCredentials(_)
            | ProviderError::Parse(_)
            | ProviderError::Signing(_) => RetryClass::Never,
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(e: serde_json::Error) -> Self {
        ProviderError::Parse(e.to_string())
    }
}

/// A thin exchange adapter: fetch the raw payload, map it to canonical rows.
///
/// Adapters never retry, lock, or persist.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Which provider this adapter speaks to.
    fn provider(&self) -> Provider;

    /// Fetch the raw wallet/asset payload.
    async fn fetch_payload(&self, timeout: Duration) -> Result<serde_json::Value, ProviderError>;

    /// Map a payload to canonical rows. Malformed entries are dropped; a
    /// malformed envelope is an error.
    fn iter_rows(&self, payload: &serde_json::Value) -> Result<Vec<ProviderRow>, ProviderError>;

    /// Seed-only adapters run only while the exchange has no assets.
    fn seed_only(&self) -> bool {
        false
    }

    /// Whether the provider's withdraw maximum is trustworthy enough to store.
    /// When false the stored value is left as is.
    fn writes_withdraw_max(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Repository Traits
// ---------------------------------------------------------------------------

/// Errors from the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Decode error: {0}")]
    Decode(String),
}

/// Asset rows keyed by (exchange, asset_code, chain_code).
#[async_trait]
pub trait AssetRepository: Send + Sync {
    /// Load one row.
    async fn find_asset(
        &self,
        exchange_id: i64,
        asset_code: &str,
        chain_code: &str,
    ) -> Result<Option<AssetRecord>, RepoError>;

    /// Insert or update one row in its own transaction, writing only the
    /// columns that differ from the stored row. `last_synced_at` is always set.
    async fn upsert_asset(
        &self,
        exchange_id: i64,
        asset_code: &str,
        chain_code: &str,
        fields: &AssetFields,
        synced_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome, RepoError>;

    /// Rows with AD or AW currently set.
    async fn list_enabled_assets(&self, exchange_id: i64) -> Result<Vec<AssetRecord>, RepoError>;

    /// Soft-disable a row: AD=AW=false plus a status note.
    async fn disable_asset(&self, id: i64, note: &str) -> Result<(), RepoError>;

    /// Number of rows for an exchange.
    async fn count_assets(&self, exchange_id: i64) -> Result<i64, RepoError>;
}

/// One availability probe result, appended to the log.
#[derive(Debug, Clone, PartialEq)]
pub struct AvailabilityEntry {
    pub exchange_id: i64,
    pub is_available: bool,
    pub code: String,
    pub detail: String,
    pub latency_ms: i32,
    pub checked_at: DateTime<Utc>,
}

/// Exchanges, credentials, availability, and stats history.
#[async_trait]
pub trait ExchangeRepository: Send + Sync {
    async fn get_exchange(&self, id: i64) -> Result<Option<Exchange>, RepoError>;

    /// All exchanges, optionally restricted to some providers, ordered by id.
    async fn list_exchanges(&self, providers: &[Provider]) -> Result<Vec<Exchange>, RepoError>;

    /// First enabled API key pair for an exchange.
    async fn credentials(&self, exchange_id: i64) -> Result<Option<Credentials>, RepoError>;

    /// Write `is_available`. Returns true when the value changed.
    async fn set_availability(&self, exchange_id: i64, available: bool) -> Result<bool, RepoError>;

    async fn log_availability(&self, entry: &AvailabilityEntry) -> Result<(), RepoError>;

    /// Delete availability log entries older than `before`.
    async fn prune_availability(&self, before: DateTime<Utc>) -> Result<u64, RepoError>;

    /// Append a stats snapshot and optionally refresh the stablecoin list.
    async fn append_stats(
        &self,
        exchange_id: i64,
        snapshot: &serde_json::Value,
        stablecoin: Option<&str>,
    ) -> Result<(), RepoError>;
}

/// Durable quote history.
#[async_trait]
pub trait PriceRepository: Send + Sync {
    async fn insert_price(&self, row: &PriceRow) -> Result<(), RepoError>;

    /// Most recent durable row for a pair.
    async fn latest_price(
        &self,
        exchange_id: i64,
        base: &str,
        quote: &str,
    ) -> Result<Option<PriceRow>, RepoError>;

    /// Keep only the latest quote per pair (admin mirror, no history).
    async fn upsert_latest_quote(&self, quote: &L1Quote) -> Result<(), RepoError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        let rate_limited = ProviderError::Http {
            status: 429,
            body: String::new(),
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(
            rate_limited.retry_class(),
            RetryClass::RetryAfter(Duration::from_secs(7))
        );

        let server = ProviderError::Http {
            status: 503,
            body: String::new(),
            retry_after: None,
        };
        assert_eq!(server.retry_class(), RetryClass::WithBackoff);

        let forbidden = ProviderError::Http {
            status: 403,
            body: String::new(),
            retry_after: None,
        };
        assert_eq!(forbidden.retry_class(), RetryClass::Never);

        assert_eq!(ProviderError::Timeout.retry_class(), RetryClass::WithBackoff);
        assert_eq!(
            ProviderError::MissingCredentials(Provider::Bybit).retry_class(),
            RetryClass::Never
        );
    }
}
