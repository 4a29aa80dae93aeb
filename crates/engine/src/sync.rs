use crate::normalize::{Normalizer, Rejection};
use crate::retry::RetryPolicy;
use crate::SyncError;
use chrono::Utc;
use marketsync_cache::{
    sync_scope, CircuitBreaker, CircuitBreakerConfig, CoordinationStore, Debounce, GlobalSlots,
    KeyLock,
};
use marketsync_core::numeric::{norm_code, to_db_amount};
use marketsync_core::*;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One sync invocation for one exchange.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub exchange_id: i64,
    /// Process at most this many rows. A limited run never reconciles.
    pub limit: Option<usize>,
    pub reconcile: bool,
    /// Compute stats without writing.
    pub dry_run: bool,
    pub timeout: Duration,
}

impl SyncRequest {
    pub fn full(exchange_id: i64, timeout: Duration) -> Self {
        Self {
            exchange_id,
            limit: None,
            reconcile: true,
            dry_run: false,
            timeout,
        }
    }

    /// Full runs are debounced and reconcile.
    pub fn is_full_run(&self) -> bool {
        self.limit.is_none() && self.reconcile
    }
}

pub struct SyncEngine {
    store: Arc<dyn CoordinationStore>,
    assets: Arc<dyn AssetRepository>,
    settings: SyncSettings,
    retry: RetryPolicy,
    normalizer: Normalizer,
    circuit: CircuitBreaker,
    debounce: Debounce,
    slots: GlobalSlots,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        assets: Arc<dyn AssetRepository>,
        settings: SyncSettings,
    ) -> Self {
        let circuit = CircuitBreaker::new(
            store.clone(),
            CircuitBreakerConfig {
                failure_threshold: settings.fail_threshold.max(1),
                open_ttl: settings.circuit_ttl(),
                ..Default::default()
            },
        );
        let debounce = Debounce::new(settings.debounce());
        let slots = GlobalSlots::new(settings.global_max, settings.lock_ttl());
        Self {
            store,
            assets,
            settings,
            retry: RetryPolicy::default(),
            normalizer: Normalizer::default(),
            circuit,
            debounce,
            slots,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Run one pass. Skips return zero-effect stats with a reason; a fetch
    /// failure is recorded against the circuit before it is returned.
    pub async fn run(
        &self,
        adapter: &dyn ProviderAdapter,
        req: &SyncRequest,
    ) -> Result<SyncStats, SyncError> {
        let provider = adapter.provider();
        let scope = sync_scope(provider, req.exchange_id);
        let store = self.store.as_ref();

        if !self.circuit.is_allowed(&scope).await? {
            info!(provider = %provider, exchange_id = req.exchange_id, "Circuit open, skipping");
            return Ok(SyncStats::skipped_pass(SkipReason::CircuitOpen));
        }
        if req.is_full_run() && self.debounce.is_debounced(store, &scope).await? {
            debug!(provider = %provider, exchange_id = req.exchange_id, "Debounced");
            return Ok(SyncStats::skipped_pass(SkipReason::Debounced));
        }

        let Some(slot) = self.slots.acquire(store, self.settings.slot_wait()).await? else {
            warn!(provider = %provider, exchange_id = req.exchange_id, "No global slot available");
            return Ok(SyncStats::skipped_pass(SkipReason::NoSlot));
        };

        let lock = KeyLock::for_scope(&scope, self.settings.lock_ttl());
        let token = match lock.acquire(store).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                info!(provider = %provider, exchange_id = req.exchange_id, "Sync already running");
                slot.release(store).await?;
                return Ok(SyncStats::skipped_pass(SkipReason::Locked));
            }
            Err(e) => {
                slot.release(store).await?;
                return Err(e.into());
            }
        };

        let result = self.run_locked(adapter, req, &scope).await;

        if let Err(e) = token.release(store).await {
            warn!(key = %token.key, error = %e, "Failed to release sync lock");
        }
        if let Err(e) = slot.release(store).await {
            warn!(error = %e, "Failed to release global slot");
        }

        match &result {
            Ok(stats) => info!(
                provider = %provider,
                exchange_id = req.exchange_id,
                dry_run = req.dry_run,
                "Sync finished: {}",
                stats
            ),
            Err(e) => warn!(provider = %provider, exchange_id = req.exchange_id, error = %e, "Sync failed"),
        }
        result
    }

    async fn run_locked(
        &self,
        adapter: &dyn ProviderAdapter,
        req: &SyncRequest,
        scope: &str,
    ) -> Result<SyncStats, SyncError> {
        if adapter.seed_only() && self.assets.count_assets(req.exchange_id).await? > 0 {
            debug!(provider = %adapter.provider(), "Seed-only adapter and assets exist");
            return Ok(SyncStats::skipped_pass(SkipReason::AlreadySeeded));
        }

        let rows = self.fetch_rows(adapter, req, scope).await?;
        let stats = self.apply_rows(adapter, req, rows).await?;

        if req.is_full_run() && self.is_writing(req) {
            self.debounce.mark_run(self.store.as_ref(), scope).await?;
        }
        Ok(stats)
    }

    /// Fetch and map with retries, then update the circuit either way.
    async fn fetch_rows(
        &self,
        adapter: &dyn ProviderAdapter,
        req: &SyncRequest,
        scope: &str,
    ) -> Result<Vec<ProviderRow>, SyncError> {
        let fetched = self
            .retry
            .run(scope, |_| adapter.fetch_payload(req.timeout))
            .await
            .and_then(|payload| adapter.iter_rows(&payload));

        match fetched {
            Ok(rows) => {
                if let Err(e) = self.circuit.record_success(scope).await {
                    warn!(scope = %scope, error = %e, "Failed to clear failure counter");
                }
                Ok(rows)
            }
            Err(error) => {
                if let Err(e) = self.circuit.record_failure(scope).await {
                    warn!(scope = %scope, error = %e, "Failed to record fetch failure");
                }
                Err(error.into())
            }
        }
    }

    fn is_writing(&self, req: &SyncRequest) -> bool {
        self.settings.write_enabled && !req.dry_run
    }

    async fn apply_rows(
        &self,
        adapter: &dyn ProviderAdapter,
        req: &SyncRequest,
        rows: Vec<ProviderRow>,
    ) -> Result<SyncStats, SyncError> {
        let provider = adapter.provider();
        let writing = self.is_writing(req);
        let mut stats = SyncStats::default();
        let mut seen: HashSet<(String, String)> = HashSet::new();

        let rows: Vec<ProviderRow> = match req.limit {
            Some(limit) => rows.into_iter().take(limit).collect(),
            None => rows,
        };

        for chunk in rows.chunks(self.settings.db_chunk_size.max(1)) {
            let synced_at = Utc::now();

            for row in chunk {
                stats.processed += 1;

                let normalized = match self.normalizer.normalize(row) {
                    Ok(n) => n,
                    Err(rejection) => {
                        if rejection == Rejection::Guard {
                            seen.insert((norm_code(&row.asset_code), norm_code(&row.chain_code)));
                        }
                        debug!(asset = %row.asset_code, chain = %row.chain_code, reason = %rejection, "Row skipped");
                        stats.skipped += 1;
                        continue;
                    }
                };

                let key = (normalized.asset_code.clone(), normalized.chain_code.clone());
                if !seen.insert(key) {
                    debug!(asset = %normalized.asset_code, chain = %normalized.chain_code, "Duplicate row");
                    stats.skipped += 1;
                    continue;
                }

                let mut fields = normalized.fields;
                let existing = if writing && adapter.writes_withdraw_max() {
                    None
                } else {
                    self.assets
                        .find_asset(req.exchange_id, &normalized.asset_code, &normalized.chain_code)
                        .await?
                };

                if !adapter.writes_withdraw_max() {
                    fields.withdraw_max = match &existing {
                        Some(record) => record.fields.withdraw_max,
                        None => to_db_amount(Decimal::ZERO, fields.amount_precision.max(0) as u32),
                    };
                }

                let outcome = if writing {
                    self.assets
                        .upsert_asset(
                            req.exchange_id,
                            &normalized.asset_code,
                            &normalized.chain_code,
                            &fields,
                            synced_at,
                        )
                        .await?
                } else {
                    match &existing {
                        None => UpsertOutcome::Created,
                        Some(record) if fields.diff(&record.fields).is_empty() => {
                            UpsertOutcome::Unchanged
                        }
                        Some(_) => UpsertOutcome::Updated,
                    }
                };

                match outcome {
                    UpsertOutcome::Created => stats.created += 1,
                    UpsertOutcome::Updated => stats.updated += 1,
                    UpsertOutcome::Unchanged => stats.skipped += 1,
                }
            }

            debug!(provider = %provider, processed = stats.processed, "Chunk applied");
        }

        if req.is_full_run() {
            if seen.is_empty() {
                warn!(provider = %provider, exchange_id = req.exchange_id, "Empty feed, reconcile skipped");
            } else {
                stats.disabled = self.reconcile(provider, req, &seen, writing).await?;
            }
        }

        Ok(stats)
    }

    /// Soft-disable enabled rows missing from this feed.
    async fn reconcile(
        &self,
        provider: Provider,
        req: &SyncRequest,
        seen: &HashSet<(String, String)>,
        writing: bool,
    ) -> Result<u64, SyncError> {
        let note = format!("Disabled: absent from {} feed", provider.as_str());
        let mut disabled = 0;

        for record in self.assets.list_enabled_assets(req.exchange_id).await? {
            let key = (record.asset_code.clone(), record.chain_code.clone());
            if seen.contains(&key) {
                continue;
            }
            if writing {
                self.assets.disable_asset(record.id, &note).await?;
            }
            info!(
                provider = %provider,
                asset = %record.asset_code,
                chain = %record.chain_code,
                "Asset absent from feed, disabled"
            );
            disabled += 1;
        }
        Ok(disabled)
    }
}
