use crate::probe::{probe_status, probe_time, status_url, time_url, ProbeClient};
use crate::{HealthCode, HealthError, HealthResult};
use chrono::{Duration as ChronoDuration, Utc};
use marketsync_core::{
    AvailabilityEntry, Exchange, ExchangeKind, ExchangeRepository, HealthSettings, Provider,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

const MAX_DETAIL: usize = 512;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckSummary {
    pub checked: u64,
    pub available: u64,
    pub changed: u64,
}

pub struct HealthChecker {
    repo: Arc<dyn ExchangeRepository>,
    probes: Arc<dyn ProbeClient>,
    settings: HealthSettings,
}

impl HealthChecker {
    pub fn new(
        repo: Arc<dyn ExchangeRepository>,
        probes: Arc<dyn ProbeClient>,
        settings: HealthSettings,
    ) -> Self {
        Self {
            repo,
            probes,
            settings,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.settings.timeout_secs.max(1))
    }

    /// Probe one exchange without persisting anything.
    pub async fn check(&self, exchange: &Exchange) -> HealthResult {
        if exchange.provider == Provider::Manual || exchange.kind == ExchangeKind::Manual {
            return HealthResult::skipped(HealthCode::SkippedManual, "manual provider");
        }
        match exchange.kind {
            ExchangeKind::Psp => {
                return HealthResult::skipped(HealthCode::SkippedPsp, "PSP check not implemented")
            }
            ExchangeKind::Wallet | ExchangeKind::Node | ExchangeKind::Bank => {
                return HealthResult::skipped(HealthCode::SkippedPsp, "wallet/node check not implemented")
            }
            _ => {}
        }

        let timeout = self.timeout();
        if let Some(url) = status_url(exchange.provider) {
            let status = probe_status(self.probes.as_ref(), exchange.provider, &url, timeout).await;
            if status.code == HealthCode::Maintenance {
                return status;
            }
            tracing::debug!(provider = %exchange.provider, code = %status.code, "Status inconclusive, trying time probe");
        }
        match time_url(exchange.provider) {
            Some(url) => probe_time(self.probes.as_ref(), &url, timeout).await,
            None => HealthResult::skipped(HealthCode::SkippedNoProbe, "no probe configured"),
        }
    }

    /// Check and persist: availability is written only when it changed, and
    /// every check is appended to the availability log.
    pub async fn apply(&self, exchange: &Exchange, dry_run: bool) -> Result<HealthResult, HealthError> {
        let result = self.check(exchange).await;
        let changed = result.available != exchange.is_available;

        if !dry_run {
            if changed {
                self.repo.set_availability(exchange.id, result.available).await?;
            }
            let entry = AvailabilityEntry {
                exchange_id: exchange.id,
                is_available: result.available,
                code: result.code.as_str().to_string(),
                detail: result.detail.chars().take(MAX_DETAIL).collect(),
                latency_ms: result.latency_ms,
                checked_at: Utc::now(),
            };
            if let Err(e) = self.repo.log_availability(&entry).await {
                tracing::warn!(exchange_id = exchange.id, error = %e, "Failed to log availability");
            }
        }

        tracing::info!(
            provider = %exchange.provider,
            exchange_id = exchange.id,
            kind = %exchange.kind,
            available = result.available,
            code = %result.code,
            latency_ms = result.latency_ms,
            changed,
            dry_run,
            "Health checked"
        );
        Ok(result)
    }

    /// Check every exchange in order.
    pub async fn run(
        &self,
        exchanges: &[Exchange],
        dry_run: bool,
    ) -> Result<(CheckSummary, Vec<(Exchange, HealthResult)>), HealthError> {
        let mut summary = CheckSummary::default();
        let mut results = Vec::with_capacity(exchanges.len());
        for exchange in exchanges {
            let result = self.apply(exchange, dry_run).await?;
            summary.checked += 1;
            if result.available {
                summary.available += 1;
            }
            if result.available != exchange.is_available {
                summary.changed += 1;
            }
            let mut updated = exchange.clone();
            updated.is_available = result.available;
            results.push((updated, result));
        }
        Ok((summary, results))
    }

    /// Drop availability log entries older than `retention_days`.
    pub async fn prune(&self, retention_days: i64) -> Result<u64, HealthError> {
        let cutoff = ChronoDuration::try_days(retention_days.max(0))
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .ok_or(HealthError::Retention(retention_days))?;
        let removed = self.repo.prune_availability(cutoff).await?;
        tracing::info!(retention_days, removed, "Availability log pruned");
        Ok(removed)
    }
}
