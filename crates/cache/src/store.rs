use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Errors from the coordination/stream backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),
    #[error("Unexpected reply: {0}")]
    Reply(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Atomic key-value operations with expiry.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Set `key` only if it does not exist. Returns true when the key was set.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Unconditional set, with an optional expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Delete `key` only while it still holds `expected`.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    /// Increment a counter and (re)arm its expiry. Returns the new value.
    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64, StoreError>;

    /// Remaining time to live, `None` for missing or persistent keys.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;
}

/// One entry read from a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMessage {
    pub id: String,
    pub fields: HashMap<String, String>,
}

/// Append-only stream with consumer groups.
#[async_trait]
pub trait StreamStore: Send + Sync {
    /// Append an entry, trimming the stream to roughly `maxlen` entries.
    async fn append(
        &self,
        stream: &str,
        fields: &[(String, String)],
        maxlen: usize,
    ) -> Result<String, StoreError>;

    /// Create the consumer group (and the stream). An existing group is fine.
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), StoreError>;

    /// Read up to `count` new entries for `consumer`, waiting at most `block`.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamMessage>, StoreError>;

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), StoreError>;

    /// Number of entries currently in the stream.
    async fn stream_len(&self, stream: &str) -> Result<u64, StoreError>;
}
