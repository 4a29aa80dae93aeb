//! Circuit breaker backed by the shared coordination store.
//!
//! Two keys per scope:
//!
//! - `sync:fail:{scope}` counts consecutive failed fetches.
//! - `sync:circuit:{scope}` exists while the circuit is open.
//!
//! There is no half-open state: once the open key expires the next run goes
//! through, and its result either clears the counter or reopens the circuit.

use crate::store::{CoordinationStore, StoreError};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
const DEFAULT_OPEN_TTL: Duration = Duration::from_secs(300);
/// A failure streak older than this is forgotten.
const DEFAULT_FAILURE_WINDOW: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening.
    pub failure_threshold: u32,
    /// How long the circuit stays open.
    pub open_ttl: Duration,
    pub failure_window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            open_ttl: DEFAULT_OPEN_TTL,
            failure_window: DEFAULT_FAILURE_WINDOW,
        }
    }
}

pub struct CircuitBreaker {
    store: Arc<dyn CoordinationStore>,
    config: CircuitBreakerConfig,
}

fn fail_key(scope: &str) -> String {
    format!("sync:fail:{scope}")
}

fn open_key(scope: &str) -> String {
    format!("sync:circuit:{scope}")
}

impl CircuitBreaker {
    pub fn new(store: Arc<dyn CoordinationStore>, config: CircuitBreakerConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// False while the circuit for `scope` is open.
    pub async fn is_allowed(&self, scope: &str) -> Result<bool, StoreError> {
        Ok(self.store.get(&open_key(scope)).await?.is_none())
    }

    pub async fn record_success(&self, scope: &str) -> Result<(), StoreError> {
        self.store.delete(&fail_key(scope)).await?;
        self.store.delete(&open_key(scope)).await
    }

    /// Returns true when this failure opened the circuit.
    pub async fn record_failure(&self, scope: &str) -> Result<bool, StoreError> {
        let failures = self
            .store
            .incr(&fail_key(scope), self.config.failure_window)
            .await?;

        if failures < i64::from(self.config.failure_threshold) {
            tracing::debug!(scope = %scope, failures, "Recorded fetch failure");
            return Ok(false);
        }

        self.store
            .set(&open_key(scope), "1", Some(self.config.open_ttl))
            .await?;
        self.store.delete(&fail_key(scope)).await?;
        tracing::warn!(
            scope = %scope,
            failures,
            open_secs = self.config.open_ttl.as_secs(),
            "Circuit opened"
        );
        Ok(true)
    }

    /// Number of consecutive failures currently recorded.
    pub async fn failures(&self, scope: &str) -> Result<i64, StoreError> {
        Ok(self
            .store
            .get(&fail_key(scope))
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn breaker(store: Arc<MemoryStore>, open_ttl: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            store,
            CircuitBreakerConfig {
                failure_threshold: 3,
                open_ttl,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let store = Arc::new(MemoryStore::new());
        let cb = breaker(store.clone(), Duration::from_secs(300));

        assert!(!cb.record_failure("kucoin:1").await.unwrap());
        assert!(!cb.record_failure("kucoin:1").await.unwrap());
        assert!(cb.is_allowed("kucoin:1").await.unwrap());
        assert!(cb.record_failure("kucoin:1").await.unwrap());
        assert!(!cb.is_allowed("kucoin:1").await.unwrap());

        let ttl = store.ttl("sync:circuit:kucoin:1").await.unwrap().unwrap();
        assert!(ttl > Duration::from_secs(290));

        // Other scopes are unaffected.
        assert!(cb.is_allowed("kucoin:2").await.unwrap());
    }

    #[tokio::test]
    async fn test_success_resets_streak() {
        let store = Arc::new(MemoryStore::new());
        let cb = breaker(store, Duration::from_secs(300));

        cb.record_failure("s").await.unwrap();
        cb.record_failure("s").await.unwrap();
        cb.record_success("s").await.unwrap();
        assert_eq!(cb.failures("s").await.unwrap(), 0);

        assert!(!cb.record_failure("s").await.unwrap());
        assert!(cb.is_allowed("s").await.unwrap());
    }

    #[tokio::test]
    async fn test_closes_after_ttl() {
        let store = Arc::new(MemoryStore::new());
        let cb = breaker(store, Duration::from_millis(30));
        for _ in 0..3 {
            cb.record_failure("s").await.unwrap();
        }
        assert!(!cb.is_allowed("s").await.unwrap());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cb.is_allowed("s").await.unwrap());
    }
}
