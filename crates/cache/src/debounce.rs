use crate::store::{CoordinationStore, StoreError};
use chrono::Utc;
use std::time::Duration;

/// Minimum spacing between full runs for a scope, tracked in
/// `sync:last:{scope}` as a unix timestamp in milliseconds.
#[derive(Debug, Clone)]
pub struct Debounce {
    window: Duration,
}

fn last_key(scope: &str) -> String {
    format!("sync:last:{scope}")
}

impl Debounce {
    /// A zero window disables debouncing.
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn is_enabled(&self) -> bool {
        !self.window.is_zero()
    }

    /// True when the previous successful run is younger than the window.
    pub async fn is_debounced(
        &self,
        store: &dyn CoordinationStore,
        scope: &str,
    ) -> Result<bool, StoreError> {
        if !self.is_enabled() {
            return Ok(false);
        }
        let Some(raw) = store.get(&last_key(scope)).await? else {
            return Ok(false);
        };
        let Ok(last_ms) = raw.parse::<i64>() else {
            tracing::warn!(scope = %scope, value = %raw, "Ignoring malformed last-run marker");
            return Ok(false);
        };
        let elapsed_ms = Utc::now().timestamp_millis() - last_ms;
        Ok(elapsed_ms >= 0 && (elapsed_ms as u128) < self.window.as_millis())
    }

    /// Record a successful run now. The marker outlives the window so a
    /// restarted runner still sees it.
    pub async fn mark_run(
        &self,
        store: &dyn CoordinationStore,
        scope: &str,
    ) -> Result<(), StoreError> {
        let now_ms = Utc::now().timestamp_millis();
        let ttl = self.window.max(Duration::from_secs(60)) * 2;
        store.set(&last_key(scope), &now_ms.to_string(), Some(ttl)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[tokio::test]
    async fn test_disabled_window_never_debounces() {
        let store = MemoryStore::new();
        let d = Debounce::new(Duration::ZERO);
        d.mark_run(&store, "s").await.unwrap();
        assert!(!d.is_debounced(&store, "s").await.unwrap());
    }

    #[tokio::test]
    async fn test_recent_run_is_debounced() {
        let store = MemoryStore::new();
        let d = Debounce::new(Duration::from_secs(600));
        assert!(!d.is_debounced(&store, "s").await.unwrap());

        d.mark_run(&store, "s").await.unwrap();
        assert!(d.is_debounced(&store, "s").await.unwrap());
        assert!(!d.is_debounced(&store, "other").await.unwrap());
    }

    #[tokio::test]
    async fn test_old_run_is_not_debounced() {
        let store = MemoryStore::new();
        let d = Debounce::new(Duration::from_secs(60));
        let old = Utc::now().timestamp_millis() - 120_000;
        store
            .set("sync:last:s", &old.to_string(), None)
            .await
            .unwrap();
        assert!(!d.is_debounced(&store, "s").await.unwrap());
    }
}
