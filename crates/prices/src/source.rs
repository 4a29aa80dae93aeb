use crate::bybit::BybitSource;
use crate::htx::HtxSource;
use crate::kucoin::KucoinSource;
use crate::mexc::MexcSource;
use crate::openexchangerates::OpenExchangeRatesSource;
use crate::rapira::RapiraSource;
use crate::twelvedata::TwelvedataSource;
use crate::whitebit::WhitebitSource;
use async_trait::async_trait;
use marketsync_core::{Credentials, MarketPair, Provider, ProviderError};
use marketsync_providers::HttpClient;
use rust_decimal::Decimal;
use std::time::Duration;

/// One raw ticker. Prices stay optional until the collector validates them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ticker {
    /// Upper-cased exchange symbol, the key into the symbol map.
    pub symbol: String,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub last: Option<Decimal>,
    pub ts_ms: Option<i64>,
    /// Default taker fee advertised next to the price.
    pub fee_taker_bps: Option<Decimal>,
    /// Bid and ask were both set from a single reference rate.
    pub synthetic: bool,
}

/// Public market data endpoints of one provider.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    fn provider(&self) -> Provider;

    /// Tradable spot markets. Symbols are upper-cased.
    async fn symbols(&self, timeout: Duration) -> Result<Vec<MarketPair>, ProviderError>;

    /// All spot tickers in one call (two for MEXC).
    async fn tickers(&self, timeout: Duration) -> Result<Vec<Ticker>, ProviderError>;
}

/// Quote source for `provider`, if it publishes prices.
///
/// Rate feeds need an API key: [`ProviderError::MissingCredentials`] without one.
pub fn build_source(
    provider: Provider,
    http: HttpClient,
    credentials: Option<Credentials>,
) -> Result<Option<Box<dyn QuoteSource>>, ProviderError> {
    let api_key = || {
        credentials
            .as_ref()
            .map(|c| c.api_key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or(ProviderError::MissingCredentials(provider))
    };
    let source: Box<dyn QuoteSource> = match provider {
        Provider::Bybit => Box::new(BybitSource::new(http)),
        Provider::Kucoin => Box::new(KucoinSource::new(http)),
        Provider::Whitebit => Box::new(WhitebitSource::new(http)),
        Provider::Htx => Box::new(HtxSource::new(http)),
        Provider::Mexc => Box::new(MexcSource::new(http)),
        Provider::Rapira => Box::new(RapiraSource::new(http)),
        Provider::Twelvedata => Box::new(TwelvedataSource::new(http, api_key()?)),
        Provider::Openexchangerates => Box::new(OpenExchangeRatesSource::new(http, api_key()?)),
        Provider::Manual => return Ok(None),
    };
    Ok(Some(source))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Option<Credentials> {
        Some(Credentials {
            api_key: "key".into(),
            api_secret: String::new(),
        })
    }

    #[test]
    fn test_sources_match_registry() {
        for provider in Provider::ALL {
            let http = HttpClient::new().unwrap();
            let source = build_source(provider, http, creds()).unwrap();
            let spec = marketsync_providers::registry::lookup(provider);
            assert_eq!(source.is_some(), spec.prices, "{provider}");
            if let Some(source) = source {
                assert_eq!(source.provider(), provider);
            }
        }
    }

    #[test]
    fn test_rate_feeds_need_a_key() {
        for provider in [Provider::Twelvedata, Provider::Openexchangerates] {
            let http = HttpClient::new().unwrap();
            assert!(matches!(
                build_source(provider, http, None),
                Err(ProviderError::MissingCredentials(p)) if p == provider
            ));
        }
        let rapira = build_source(Provider::Rapira, HttpClient::new().unwrap(), None).unwrap();
        assert!(rapira.is_some());
    }
}
