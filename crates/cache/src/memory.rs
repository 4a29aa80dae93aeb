//! In-process store for tests and single-worker runs.
//!
//! Expiry is evaluated lazily on access. `read_group` never blocks: an empty
//! read returns immediately.

use crate::store::*;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Default)]
struct Group {
    last_delivered: u64,
    pending: HashSet<String>,
}

#[derive(Default)]
struct Stream {
    seq: u64,
    entries: VecDeque<(u64, HashMap<String, String>)>,
    groups: HashMap<String, Group>,
}

#[derive(Default)]
struct Inner {
    keys: HashMap<String, Entry>,
    streams: HashMap<String, Stream>,
}

impl Inner {
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let now = Instant::now();
        if self.keys.get(key).is_some_and(|e| !e.is_live(now)) {
            self.keys.remove(key);
        }
        self.keys.get_mut(key)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of delivered but unacknowledged entries for a group.
    pub fn pending_count(&self, stream: &str, group: &str) -> usize {
        self.lock()
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map_or(0, |g| g.pending.len())
    }

    /// Snapshot of stream entries, oldest first.
    pub fn entries(&self, stream: &str) -> Vec<StreamMessage> {
        self.lock()
            .streams
            .get(stream)
            .map(|s| {
                s.entries
                    .iter()
                    .map(|(seq, fields)| StreamMessage {
                        id: format_id(*seq),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn format_id(seq: u64) -> String {
    format!("{seq}-0")
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        if inner.live(key).is_some() {
            return Ok(false);
        }
        inner.keys.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.lock().keys.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().live(key).map(|e| e.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.lock().keys.remove(key);
        Ok(())
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let matches = inner.live(key).is_some_and(|e| e.value == expected);
        if matches {
            inner.keys.remove(key);
        }
        Ok(matches)
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let mut inner = self.lock();
        let current = match inner.live(key) {
            Some(entry) => entry
                .value
                .parse::<i64>()
                .map_err(|_| StoreError::Reply(format!("value at {key} is not an integer")))?,
            None => 0,
        };
        let next = current + 1;
        inner.keys.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(next)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = Instant::now();
        Ok(self
            .lock()
            .live(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }
}

#[async_trait]
impl StreamStore for MemoryStore {
    async fn append(
        &self,
        stream: &str,
        fields: &[(String, String)],
        maxlen: usize,
    ) -> Result<String, StoreError> {
        let mut inner = self.lock();
        let s = inner.streams.entry(stream.to_string()).or_default();
        s.seq += 1;
        let seq = s.seq;
        s.entries.push_back((seq, fields.iter().cloned().collect()));
        while maxlen > 0 && s.entries.len() > maxlen {
            s.entries.pop_front();
        }
        Ok(format_id(seq))
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let s = inner.streams.entry(stream.to_string()).or_default();
        s.groups.entry(group.to_string()).or_default();
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        _consumer: &str,
        count: usize,
        _block: Duration,
    ) -> Result<Vec<StreamMessage>, StoreError> {
        let mut inner = self.lock();
        let s = inner
            .streams
            .get_mut(stream)
            .ok_or_else(|| StoreError::Backend(format!("NOGROUP no such stream {stream}")))?;
        let Stream {
            entries, groups, ..
        } = s;
        let g = groups
            .get_mut(group)
            .ok_or_else(|| StoreError::Backend(format!("NOGROUP no such group {group}")))?;

        let mut out = Vec::new();
        for (seq, fields) in entries.iter() {
            if out.len() >= count {
                break;
            }
            if *seq <= g.last_delivered {
                continue;
            }
            let id = format_id(*seq);
            g.last_delivered = *seq;
            g.pending.insert(id.clone());
            out.push(StreamMessage {
                id,
                fields: fields.clone(),
            });
        }
        Ok(out)
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), StoreError> {
        if let Some(g) = self
            .lock()
            .streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
        {
            g.pending.remove(id);
        }
        Ok(())
    }

    async fn stream_len(&self, stream: &str) -> Result<u64, StoreError> {
        Ok(self
            .lock()
            .streams
            .get(stream)
            .map_or(0, |s| s.entries.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_if_absent_respects_expiry() {
        let store = MemoryStore::new();
        assert!(store
            .set_if_absent("k", "a", Duration::from_millis(20))
            .await
            .unwrap());
        assert!(!store
            .set_if_absent("k", "b", Duration::from_secs(1))
            .await
            .unwrap());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store
            .set_if_absent("k", "b", Duration::from_secs(1))
            .await
            .unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_delete_if_equals() {
        let store = MemoryStore::new();
        store.set("k", "mine", None).await.unwrap();
        assert!(!store.delete_if_equals("k", "theirs").await.unwrap());
        assert!(store.delete_if_equals("k", "mine").await.unwrap());
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_incr_counts_and_sets_ttl() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("c", Duration::from_secs(60)).await.unwrap(), 1);
        assert_eq!(store.incr("c", Duration::from_secs(60)).await.unwrap(), 2);
        let ttl = store.ttl("c").await.unwrap().unwrap();
        assert!(ttl <= Duration::from_secs(60));
        assert!(ttl > Duration::from_secs(50));
    }

    #[tokio::test]
    async fn test_stream_group_delivers_once() {
        let store = MemoryStore::new();
        store.ensure_group("s", "g").await.unwrap();
        for i in 0..5 {
            store
                .append("s", &[("n".to_string(), i.to_string())], 100)
                .await
                .unwrap();
        }

        let first = store
            .read_group("s", "g", "c1", 3, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(first.len(), 3);
        let rest = store
            .read_group("s", "g", "c1", 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[1].fields["n"], "4");
        assert_eq!(store.pending_count("s", "g"), 5);

        for msg in first.iter().chain(rest.iter()) {
            store.ack("s", "g", &msg.id).await.unwrap();
        }
        assert_eq!(store.pending_count("s", "g"), 0);
    }

    #[tokio::test]
    async fn test_stream_trims_to_maxlen() {
        let store = MemoryStore::new();
        for i in 0..10 {
            store
                .append("s", &[("n".to_string(), i.to_string())], 4)
                .await
                .unwrap();
        }
        assert_eq!(store.stream_len("s").await.unwrap(), 4);
        assert_eq!(store.entries("s")[0].fields["n"], "6");
    }

    #[tokio::test]
    async fn test_read_without_group_fails() {
        let store = MemoryStore::new();
        store.append("s", &[], 10).await.unwrap();
        assert!(store
            .read_group("s", "missing", "c", 1, Duration::ZERO)
            .await
            .is_err());
    }
}
