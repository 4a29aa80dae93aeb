//! Static provider registry: capabilities and adapter construction.

use crate::bybit::BybitAdapter;
use crate::cash::CashSeedAdapter;
use crate::htx::HtxAdapter;
use crate::http::HttpClient;
use crate::kucoin::KucoinAdapter;
use crate::mexc::MexcAdapter;
use crate::rapira::RapiraAdapter;
use crate::whitebit::WhitebitAdapter;
use marketsync_core::{Credentials, Provider, ProviderAdapter, ProviderError, ProviderSettings};

/// What a provider supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderSpec {
    pub provider: Provider,
    pub wallet_assets: bool,
    pub prices: bool,
    pub stats: bool,
    /// The wallet adapter cannot run without API keys.
    pub needs_credentials: bool,
}

const fn spec(
    provider: Provider,
    wallet_assets: bool,
    prices: bool,
    stats: bool,
    needs_credentials: bool,
) -> ProviderSpec {
    ProviderSpec {
        provider,
        wallet_assets,
        prices,
        stats,
        needs_credentials,
    }
}

pub const REGISTRY: [ProviderSpec; 9] = [
    spec(Provider::Kucoin, true, true, true, false),
    spec(Provider::Bybit, true, true, true, true),
    spec(Provider::Mexc, true, true, true, true),
    spec(Provider::Htx, true, true, true, false),
    spec(Provider::Whitebit, true, true, true, false),
    spec(Provider::Rapira, true, true, true, false),
    spec(Provider::Twelvedata, true, true, false, false),
    spec(Provider::Openexchangerates, true, true, false, false),
    spec(Provider::Manual, false, false, false, false),
];

pub fn lookup(provider: Provider) -> ProviderSpec {
    REGISTRY
        .iter()
        .copied()
        .find(|s| s.provider == provider)
        .unwrap_or(spec(provider, false, false, false, false))
}

/// Everything an adapter may need at construction.
#[derive(Clone)]
pub struct AdapterContext {
    pub http: HttpClient,
    pub credentials: Option<Credentials>,
    pub settings: ProviderSettings,
}

/// Build the wallet adapter for `provider`.
///
/// `Ok(None)` for providers without a wallet adapter (MANUAL).
/// [`ProviderError::MissingCredentials`] when keys are required but absent.
pub fn build_adapter(
    provider: Provider,
    ctx: AdapterContext,
) -> Result<Option<Box<dyn ProviderAdapter>>, ProviderError> {
    let spec = lookup(provider);
    if !spec.wallet_assets {
        return Ok(None);
    }
    let required = || {
        ctx.credentials
            .clone()
            .ok_or(ProviderError::MissingCredentials(provider))
    };
    let recv_window = ctx.settings.recv_window_ms;

    let adapter: Box<dyn ProviderAdapter> = match provider {
        Provider::Kucoin => Box::new(KucoinAdapter::new(ctx.http.clone())),
        Provider::Bybit => Box::new(BybitAdapter::new(ctx.http.clone(), required()?, recv_window)),
        Provider::Mexc => Box::new(MexcAdapter::new(ctx.http.clone(), required()?, recv_window)),
        Provider::Htx => Box::new(HtxAdapter::new(ctx.http.clone())),
        Provider::Whitebit => Box::new(WhitebitAdapter::new(
            ctx.http.clone(),
            ctx.credentials.clone(),
        )),
        Provider::Rapira => Box::new(RapiraAdapter::new(
            ctx.http.clone(),
            &ctx.settings.confirmations,
        )),
        Provider::Twelvedata | Provider::Openexchangerates => {
            Box::new(CashSeedAdapter::new(provider))
        }
        Provider::Manual => return Ok(None),
    };
    Ok(Some(adapter))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(credentials: Option<Credentials>) -> AdapterContext {
        AdapterContext {
            http: HttpClient::new().unwrap(),
            credentials,
            settings: ProviderSettings::default(),
        }
    }

    #[test]
    fn test_registry_covers_every_provider() {
        for provider in Provider::ALL {
            assert_eq!(lookup(provider).provider, provider);
        }
    }

    #[test]
    fn test_signed_providers_need_credentials() {
        let err = build_adapter(Provider::Bybit, ctx(None)).err().unwrap();
        assert!(matches!(err, ProviderError::MissingCredentials(Provider::Bybit)));

        let creds = Credentials {
            api_key: "k".into(),
            api_secret: "s".into(),
        };
        let adapter = build_adapter(Provider::Mexc, ctx(Some(creds))).unwrap().unwrap();
        assert_eq!(adapter.provider(), Provider::Mexc);
    }

    #[test]
    fn test_manual_has_no_adapter() {
        assert!(build_adapter(Provider::Manual, ctx(None)).unwrap().is_none());
        let whitebit = build_adapter(Provider::Whitebit, ctx(None)).unwrap().unwrap();
        assert_eq!(whitebit.provider(), Provider::Whitebit);
    }
}
