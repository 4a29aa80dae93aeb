use crate::models::{Provider, VenueType};
use crate::numeric::{GuardBounds, ReferenceLists};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Errors while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration, usually read from `marketsync.toml`.
///
/// Every section falls back to its defaults when absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sync: SyncSettings,
    pub retry: RetrySettings,
    pub prices: PriceSettings,
    pub guard: GuardSettings,
    pub reference: ReferenceSettings,
    pub collectors: CollectorSettings,
    pub health: HealthSettings,
    /// Keyed by lowercase provider slug, e.g. `[providers.bybit]`.
    pub providers: HashMap<String, ProviderSettings>,
}

impl AppConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn provider(&self, provider: Provider) -> ProviderSettings {
        self.providers
            .get(&provider.slug())
            .cloned()
            .unwrap_or_default()
    }

    pub fn reference_lists(&self) -> ReferenceLists {
        ReferenceLists::from_raw(
            &self.reference.stablecoins,
            &self.reference.memo_required_chains,
            &self.reference.fiat,
        )
    }

    pub fn guard_bounds(&self) -> GuardBounds {
        GuardBounds {
            withdraw_min_floor: self.guard.withdraw_min_floor,
            withdraw_min_ceiling: self.guard.withdraw_min_ceiling,
            withdraw_fee_fixed_ceiling: self.guard.withdraw_fee_fixed_ceiling,
        }
    }
}

// ---------------------------------------------------------------------------
// Sync engine
// ---------------------------------------------------------------------------

/// Unified sync engine policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Write to the database. Off means counts are computed but nothing is stored.
    pub write_enabled: bool,
    pub lock_ttl_secs: u64,
    /// 0 disables debounce.
    pub debounce_secs: u64,
    pub db_chunk_size: usize,
    pub fail_threshold: u32,
    pub circuit_ttl_secs: u64,
    /// Global concurrency slots across all providers; 0 disables the pool.
    pub global_max: u32,
    /// How long to wait for a global slot; 0 fails fast.
    pub slot_wait_secs: u64,
    pub timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            write_enabled: true,
            lock_ttl_secs: 120,
            debounce_secs: 0,
            db_chunk_size: 200,
            fail_threshold: 3,
            circuit_ttl_secs: 300,
            global_max: 0,
            slot_wait_secs: 0,
            timeout_secs: 20,
        }
    }
}

impl SyncSettings {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }

    pub fn circuit_ttl(&self) -> Duration {
        Duration::from_secs(self.circuit_ttl_secs)
    }

    pub fn slot_wait(&self) -> Duration {
        Duration::from_secs(self.slot_wait_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Retry ladder for provider fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Delay before each retry, in milliseconds. The last step repeats.
    pub ladder_ms: Vec<u64>,
    pub max_attempts: u32,
    /// Extra random delay as a fraction of the step (0.25 = up to +25%).
    pub jitter_ratio: f64,
    /// Upper bound for a provider `Retry-After` hint.
    pub retry_after_cap_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            ladder_ms: vec![1_000, 2_000, 4_000],
            max_attempts: 3,
            jitter_ratio: 0.25,
            retry_after_cap_secs: 60,
        }
    }
}

// ---------------------------------------------------------------------------
// Prices
// ---------------------------------------------------------------------------

/// One value per venue type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueTable<T> {
    pub cex: T,
    pub dex: T,
    pub psp: T,
    pub otc: T,
    pub manual: T,
}

impl<T> VenueTable<T> {
    pub fn get(&self, venue: VenueType) -> &T {
        match venue {
            VenueType::Cex => &self.cex,
            VenueType::Dex => &self.dex,
            VenueType::Psp => &self.psp,
            VenueType::Otc => &self.otc,
            VenueType::Manual => &self.manual,
        }
    }
}

/// Hot cache, stream, and sampler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceSettings {
    /// Hot key template with `{provider}`, `{base}`, `{quote}` placeholders.
    pub key_format: String,
    pub stream: String,
    pub group: String,
    pub stream_maxlen: usize,
    pub symbol_cache_ttl_secs: u64,
    pub ttl_secs: VenueTable<u64>,
    pub sample_delta_pct: VenueTable<Decimal>,
    pub sample_interval_secs: VenueTable<u64>,
    pub sampler_batch: usize,
    pub sampler_block_ms: u64,
    pub sleep_secs: u64,
}

impl Default for PriceSettings {
    fn default() -> Self {
        Self {
            key_format: "price:l1:{provider}:{base}:{quote}".to_string(),
            stream: "prices:l1:updates".to_string(),
            group: "sampler".to_string(),
            stream_maxlen: 1_000_000,
            symbol_cache_ttl_secs: 600,
            ttl_secs: VenueTable {
                cex: 10,
                dex: 90,
                psp: 180,
                otc: 180,
                manual: 300,
            },
            sample_delta_pct: VenueTable {
                cex: dec!(0.30),
                dex: dec!(0.50),
                psp: dec!(0.50),
                otc: dec!(0.50),
                manual: dec!(0.50),
            },
            sample_interval_secs: VenueTable {
                cex: 15,
                dex: 60,
                psp: 300,
                otc: 300,
                manual: 300,
            },
            sampler_batch: 500,
            sampler_block_ms: 5_000,
            sleep_secs: 10,
        }
    }
}

impl PriceSettings {
    pub fn hot_key(&self, provider: &str, base: &str, quote: &str) -> String {
        self.key_format
            .replace("{provider}", provider)
            .replace("{base}", base)
            .replace("{quote}", quote)
    }

    pub fn ttl_for(&self, venue: VenueType) -> Duration {
        Duration::from_secs(*self.ttl_secs.get(venue))
    }

    pub fn symbol_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.symbol_cache_ttl_secs)
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Bounds for the crypto withdraw guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardSettings {
    pub withdraw_min_floor: Decimal,
    pub withdraw_min_ceiling: Decimal,
    pub withdraw_fee_fixed_ceiling: Decimal,
}

impl Default for GuardSettings {
    fn default() -> Self {
        let bounds = GuardBounds::default();
        Self {
            withdraw_min_floor: bounds.withdraw_min_floor,
            withdraw_min_ceiling: bounds.withdraw_min_ceiling,
            withdraw_fee_fixed_ceiling: bounds.withdraw_fee_fixed_ceiling,
        }
    }
}

/// Reference lists as free-form strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceSettings {
    pub stablecoins: String,
    pub memo_required_chains: String,
    /// Empty means the built-in fiat list.
    pub fiat: String,
}

impl Default for ReferenceSettings {
    fn default() -> Self {
        Self {
            stablecoins: "USDT, USDC, DAI, TUSD, FDUSD, USDP, PYUSD, EURC".to_string(),
            memo_required_chains: "XRP, XLM, EOS, TON, ATOM, HBAR, BNB, ALGO, XEM, STX, KAVA, IOST"
                .to_string(),
            fiat: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestration
// ---------------------------------------------------------------------------

/// Runner intervals and raw dump location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorSettings {
    pub prices_interval_secs: u64,
    pub wallet_interval_secs: u64,
    pub dump_root: PathBuf,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            prices_interval_secs: 10,
            wallet_interval_secs: 3_600,
            dump_root: PathBuf::from("log/raw"),
        }
    }
}

/// Health probe settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub timeout_secs: u64,
    pub retention_days: i64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 3,
            retention_days: 7,
        }
    }
}

/// Per-provider switches and fallback credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub recv_window_ms: Option<u64>,
    /// Confirmation overrides keyed `"COIN:CHAIN"`, e.g. `"USDT:TRX" = 20`.
    pub confirmations: HashMap<String, i32>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            api_secret: None,
            recv_window_ms: None,
            confirmations: HashMap::new(),
        }
    }
}

impl ProviderSettings {
    /// Credentials from the config file, when both halves are present.
    pub fn credentials(&self) -> Option<crate::models::Credentials> {
        match (&self.api_key, &self.api_secret) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
                Some(crate::models::Credentials {
                    api_key: key.clone(),
                    api_secret: secret.clone(),
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_sections_missing() {
        let cfg = AppConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.sync.lock_ttl_secs, 120);
        assert_eq!(cfg.sync.fail_threshold, 3);
        assert_eq!(cfg.prices.ttl_for(VenueType::Cex), Duration::from_secs(10));
        assert_eq!(*cfg.prices.sample_delta_pct.get(VenueType::Cex), dec!(0.30));
        assert!(cfg.provider(Provider::Kucoin).enabled);
    }

    #[test]
    fn test_partial_override() {
        let raw = r#"
            [sync]
            debounce_secs = 900
            global_max = 4

            [providers.bybit]
            api_key = "k"
            api_secret = "s"
            recv_window_ms = 10000
        "#;
        let cfg = AppConfig::from_toml_str(raw).unwrap();
        assert_eq!(cfg.sync.debounce_secs, 900);
        assert_eq!(cfg.sync.global_max, 4);
        assert_eq!(cfg.sync.lock_ttl_secs, 120);
        let bybit = cfg.provider(Provider::Bybit);
        assert_eq!(bybit.api_key.as_deref(), Some("k"));
        assert_eq!(bybit.recv_window_ms, Some(10000));
        assert!(bybit.enabled);
    }

    #[test]
    fn test_hot_key_format() {
        let prices = PriceSettings::default();
        assert_eq!(prices.hot_key("7", "BTC", "USDT"), "price:l1:7:BTC:USDT");
    }
}
