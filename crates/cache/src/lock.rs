use crate::store::{CoordinationStore, StoreError};
use std::time::Duration;

/// A system-wide mutex implemented as a TTL'd key.
///
/// The holder stores a fresh UUID; release only deletes the key while it
/// still carries that value, so an expired-and-retaken lock is never freed
/// by the previous holder.
#[derive(Debug, Clone)]
pub struct KeyLock {
    key: String,
    ttl: Duration,
}

/// Proof of ownership returned by [`KeyLock::acquire`].
#[derive(Debug, Clone, PartialEq)]
pub struct LockToken {
    pub key: String,
    pub value: String,
}

impl KeyLock {
    pub fn new(key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            ttl,
        }
    }

    /// `sync:lock:{scope}`
    pub fn for_scope(scope: &str, ttl: Duration) -> Self {
        Self::new(format!("sync:lock:{scope}"), ttl)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Try once. `None` means someone else holds the lock.
    pub async fn acquire(
        &self,
        store: &dyn CoordinationStore,
    ) -> Result<Option<LockToken>, StoreError> {
        let value = uuid::Uuid::new_v4().to_string();
        if store.set_if_absent(&self.key, &value, self.ttl).await? {
            Ok(Some(LockToken {
                key: self.key.clone(),
                value,
            }))
        } else {
            Ok(None)
        }
    }
}

impl LockToken {
    /// Returns false when the lock had already expired or changed hands.
    pub async fn release(&self, store: &dyn CoordinationStore) -> Result<bool, StoreError> {
        let released = store.delete_if_equals(&self.key, &self.value).await?;
        if !released {
            tracing::warn!(key = %self.key, "Lock expired before release");
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let store = MemoryStore::new();
        let lock = KeyLock::for_scope("bybit:7", Duration::from_secs(60));
        assert_eq!(lock.key(), "sync:lock:bybit:7");

        let token = lock.acquire(&store).await.unwrap().unwrap();
        assert!(lock.acquire(&store).await.unwrap().is_none());

        assert!(token.release(&store).await.unwrap());
        assert!(lock.acquire(&store).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stale_token_does_not_release_new_holder() {
        let store = MemoryStore::new();
        let lock = KeyLock::new("k", Duration::from_millis(20));
        let stale = lock.acquire(&store).await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        let fresh = lock.acquire(&store).await.unwrap().unwrap();

        assert!(!stale.release(&store).await.unwrap());
        assert_eq!(
            store.get("k").await.unwrap().as_deref(),
            Some(fresh.value.as_str())
        );
    }
}
