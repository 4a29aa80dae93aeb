//! Daily raw payload dumps and the per-host scheduler lock.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use fs2::FileExt;
use marketsync_core::{Provider, ProviderAdapter, ProviderError, ProviderRow};
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Writes `{root}/{provider}/{task}/YYYY-MM-DD.json` at most once per UTC day.
#[derive(Debug, Clone)]
pub struct DailyDump {
    root: PathBuf,
}

impl DailyDump {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, provider: Provider, task: &str, day: NaiveDate) -> PathBuf {
        self.root
            .join(provider.slug())
            .join(task)
            .join(format!("{}.json", day.format("%Y-%m-%d")))
    }

    /// Returns false when today's dump already exists or another process is
    /// writing it.
    pub fn write(&self, provider: Provider, task: &str, payload: &Value) -> std::io::Result<bool> {
        self.write_for_day(provider, task, payload, Utc::now().date_naive())
    }

    pub fn write_for_day(
        &self,
        provider: Provider,
        task: &str,
        payload: &Value,
        day: NaiveDate,
    ) -> std::io::Result<bool> {
        let path = self.path_for(provider, task, day);
        if path.exists() {
            return Ok(false);
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let lock_path = path.with_extension("json.lock");
        match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e),
        }

        let result = (|| {
            let body = serde_json::to_vec_pretty(payload)?;
            let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
            file.write_all(&body)?;
            Ok::<_, std::io::Error>(())
        })();
        let _ = fs::remove_file(&lock_path);
        result.map(|_| true)
    }
}

/// Exclusive advisory lock on a pid file, held for the life of the process.
///
/// The OS drops the lock when the holder exits, however it exits, so a file
/// left behind by a killed scheduler never blocks the next one.
#[derive(Debug)]
pub struct ProcessLock {
    file: File,
}

impl ProcessLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| anyhow::anyhow!("Cannot open {}: {e}", path.display()))?;
        if let Err(e) = file.try_lock_exclusive() {
            if e.kind() == fs2::lock_contended_error().kind() || e.kind() == ErrorKind::WouldBlock {
                let holder = fs::read_to_string(path).unwrap_or_default();
                anyhow::bail!(
                    "Another scheduler holds {} (pid {})",
                    path.display(),
                    holder.trim()
                );
            }
            return Err(anyhow::anyhow!("Cannot lock {}: {e}", path.display()));
        }
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;
        Ok(Self { file })
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Wraps an adapter to dump its raw payload and keep the last one around for
/// the stats task.
pub struct TapAdapter {
    inner: Box<dyn ProviderAdapter>,
    dump: Option<DailyDump>,
    last: Mutex<Option<Value>>,
}

impl TapAdapter {
    pub fn new(inner: Box<dyn ProviderAdapter>, dump: Option<DailyDump>) -> Self {
        Self {
            inner,
            dump,
            last: Mutex::new(None),
        }
    }

    /// Rows from the last fetched payload, if any.
    pub fn last_rows(&self) -> Option<Vec<ProviderRow>> {
        let last = self.last.lock().ok()?.clone()?;
        self.inner.iter_rows(&last).ok()
    }
}

#[async_trait]
impl ProviderAdapter for TapAdapter {
    fn provider(&self) -> Provider {
        self.inner.provider()
    }

    async fn fetch_payload(&self, timeout: Duration) -> Result<Value, ProviderError> {
        let payload = self.inner.fetch_payload(timeout).await?;
        if let Some(dump) = &self.dump {
            match dump.write(self.provider(), "wallet-assets", &payload) {
                Ok(true) => tracing::info!(provider = %self.provider(), "Raw wallet payload dumped"),
                Ok(false) => {}
                Err(e) => tracing::warn!(provider = %self.provider(), error = %e, "Raw dump failed"),
            }
        }
        if let Ok(mut last) = self.last.lock() {
            *last = Some(payload.clone());
        }
        Ok(payload)
    }

    fn iter_rows(&self, payload: &Value) -> Result<Vec<ProviderRow>, ProviderError> {
        self.inner.iter_rows(payload)
    }

    fn seed_only(&self) -> bool {
        self.inner.seed_only()
    }

    fn writes_withdraw_max(&self) -> bool {
        self.inner.writes_withdraw_max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scratch() -> PathBuf {
        std::env::temp_dir().join(format!("marketsync-test-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_dump_once_per_day() {
        let root = scratch();
        let dump = DailyDump::new(&root);
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

        assert!(dump
            .write_for_day(Provider::Bybit, "prices", &json!({"a": 1}), day)
            .unwrap());
        assert!(!dump
            .write_for_day(Provider::Bybit, "prices", &json!({"a": 2}), day)
            .unwrap());

        let path = root.join("bybit/prices/2024-03-01.json");
        let stored: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(stored, json!({"a": 1}));
        assert!(!path.with_extension("json.lock").exists());
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_dump_skips_while_locked() {
        let root = scratch();
        let dump = DailyDump::new(&root);
        let day = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        let path = dump.path_for(Provider::Htx, "wallet-assets", day);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path.with_extension("json.lock"), b"").unwrap();

        assert!(!dump
            .write_for_day(Provider::Htx, "wallet-assets", &json!([]), day)
            .unwrap());
        assert!(!path.exists());
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_process_lock_is_exclusive() {
        let root = scratch();
        fs::create_dir_all(&root).unwrap();
        let path = root.join("marketsync.lock");

        let held = ProcessLock::acquire(&path).unwrap();
        assert!(ProcessLock::acquire(&path).is_err());
        drop(held);
        assert!(ProcessLock::acquire(&path).is_ok());
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_process_lock_takes_over_file_of_dead_holder() {
        let root = scratch();
        fs::create_dir_all(&root).unwrap();
        let path = root.join("marketsync.lock");
        // Left behind by a scheduler that was killed before it could clean up.
        fs::write(&path, "4194303\n").unwrap();

        let held = ProcessLock::acquire(&path).unwrap();
        let pid = fs::read_to_string(&path).unwrap();
        assert_eq!(pid.trim(), std::process::id().to_string());
        assert!(ProcessLock::acquire(&path).is_err());
        drop(held);
        fs::remove_dir_all(root).unwrap();
    }
}
