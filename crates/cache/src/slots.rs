//! Fleet-wide concurrency limit.
//!
//! `max` keys `sync:gslot:{i}` act as semaphore permits. A holder owns one
//! key for at most `ttl`, so a crashed runner frees its slot on expiry.

use crate::store::{CoordinationStore, StoreError};
use rand::seq::SliceRandom;
use rand::Rng;
use std::time::{Duration, Instant};

const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_CAP: Duration = Duration::from_secs(2);
const BACKOFF_JITTER_MS: u64 = 200;

#[derive(Debug, Clone)]
pub struct GlobalSlots {
    max: u32,
    ttl: Duration,
}

/// A held slot. An unlimited pool hands out guards with no key.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotGuard {
    key: Option<String>,
    token: String,
}

impl SlotGuard {
    fn unlimited() -> Self {
        Self {
            key: None,
            token: String::new(),
        }
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub async fn release(&self, store: &dyn CoordinationStore) -> Result<(), StoreError> {
        if let Some(key) = &self.key {
            store.delete_if_equals(key, &self.token).await?;
        }
        Ok(())
    }
}

impl GlobalSlots {
    /// `max == 0` disables the pool: every acquire succeeds immediately.
    pub fn new(max: u32, ttl: Duration) -> Self {
        Self { max, ttl }
    }

    pub fn is_unlimited(&self) -> bool {
        self.max == 0
    }

    /// One pass over all slots in random order.
    pub async fn try_acquire(
        &self,
        store: &dyn CoordinationStore,
    ) -> Result<Option<SlotGuard>, StoreError> {
        if self.is_unlimited() {
            return Ok(Some(SlotGuard::unlimited()));
        }

        let mut indices: Vec<u32> = (0..self.max).collect();
        indices.shuffle(&mut rand::thread_rng());
        let token = uuid::Uuid::new_v4().to_string();

        for i in indices {
            let key = format!("sync:gslot:{i}");
            if store.set_if_absent(&key, &token, self.ttl).await? {
                return Ok(Some(SlotGuard {
                    key: Some(key),
                    token,
                }));
            }
        }
        Ok(None)
    }

    /// Retry with exponential backoff until a slot frees up or `max_wait`
    /// passes. Gives up rather than queueing.
    pub async fn acquire(
        &self,
        store: &dyn CoordinationStore,
        max_wait: Duration,
    ) -> Result<Option<SlotGuard>, StoreError> {
        let deadline = Instant::now() + max_wait;
        let mut attempt: u32 = 0;

        loop {
            if let Some(guard) = self.try_acquire(store).await? {
                return Ok(Some(guard));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let delay = backoff(attempt).min(deadline - now);
            tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Waiting for global slot");
            tokio::time::sleep(delay).await;
            attempt = attempt.saturating_add(1);
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE
        .saturating_mul(1u32 << attempt.min(8))
        .min(BACKOFF_CAP);
    let jitter = rand::thread_rng().gen_range(0..=BACKOFF_JITTER_MS);
    exp + Duration::from_millis(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[tokio::test]
    async fn test_pool_is_bounded() {
        let store = MemoryStore::new();
        let slots = GlobalSlots::new(2, Duration::from_secs(60));

        let a = slots.try_acquire(&store).await.unwrap().unwrap();
        let b = slots.try_acquire(&store).await.unwrap().unwrap();
        assert_ne!(a.key(), b.key());
        assert!(slots.try_acquire(&store).await.unwrap().is_none());

        a.release(&store).await.unwrap();
        assert!(slots.try_acquire(&store).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unlimited_pool_never_blocks() {
        let store = MemoryStore::new();
        let slots = GlobalSlots::new(0, Duration::from_secs(60));
        for _ in 0..10 {
            let guard = slots.try_acquire(&store).await.unwrap().unwrap();
            assert!(guard.key().is_none());
        }
    }

    #[tokio::test]
    async fn test_blocking_acquire_gives_up() {
        let store = MemoryStore::new();
        let slots = GlobalSlots::new(1, Duration::from_secs(60));
        let _held = slots.try_acquire(&store).await.unwrap().unwrap();

        let started = Instant::now();
        let got = slots
            .acquire(&store, Duration::from_millis(300))
            .await
            .unwrap();
        assert!(got.is_none());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_blocking_acquire_picks_up_expired_slot() {
        let store = MemoryStore::new();
        let slots = GlobalSlots::new(1, Duration::from_millis(100));
        let _held = slots.try_acquire(&store).await.unwrap().unwrap();

        let got = slots.acquire(&store, Duration::from_secs(3)).await.unwrap();
        assert!(got.is_some());
    }

    #[test]
    fn test_backoff_is_capped() {
        for attempt in 0..20 {
            let d = backoff(attempt);
            assert!(d >= BACKOFF_BASE);
            assert!(d <= BACKOFF_CAP + Duration::from_millis(BACKOFF_JITTER_MS));
        }
    }
}
