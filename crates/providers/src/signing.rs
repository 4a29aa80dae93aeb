//! Request signatures for the authenticated provider endpoints.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use marketsync_core::ProviderError;
use sha2::{Sha256, Sha512};

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// Lowercase hex HMAC-SHA256.
pub fn hmac_sha256_hex(secret: &str, message: &[u8]) -> Result<String, ProviderError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ProviderError::Signing(format!("Invalid secret key: {e}")))?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Lowercase hex HMAC-SHA512.
pub fn hmac_sha512_hex(secret: &str, message: &[u8]) -> Result<String, ProviderError> {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|e| ProviderError::Signing(format!("Invalid secret key: {e}")))?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Bybit v5: `HMAC-SHA256(secret, timestamp + api_key + recv_window + query)`.
pub fn bybit_signature(
    secret: &str,
    timestamp_ms: i64,
    api_key: &str,
    recv_window_ms: u64,
    query: &str,
) -> Result<String, ProviderError> {
    let prehash = format!("{timestamp_ms}{api_key}{recv_window_ms}{query}");
    hmac_sha256_hex(secret, prehash.as_bytes())
}

/// MEXC: the signature covers the query string exactly as sent.
pub fn mexc_signature(secret: &str, query: &str) -> Result<String, ProviderError> {
    hmac_sha256_hex(secret, query.as_bytes())
}

/// WhiteBIT private API: returns `(X-TXC-PAYLOAD, X-TXC-SIGNATURE)` for a
/// JSON body.
pub fn whitebit_payload(secret: &str, body: &[u8]) -> Result<(String, String), ProviderError> {
    let payload = STANDARD.encode(body);
    let signature = hmac_sha512_hex(secret, payload.as_bytes())?;
    Ok((payload, signature))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOX: &[u8] = b"The quick brown fox jumps over the lazy dog";

    #[test]
    fn test_hmac_sha256_vector() {
        assert_eq!(
            hmac_sha256_hex("key", FOX).unwrap(),
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn test_hmac_sha512_vector() {
        assert_eq!(
            hmac_sha512_hex("key", FOX).unwrap(),
            "b42af09057bac1e2d41708e48a902e09b5ff7f12ab428a4fe86653c73dd248fb\
             82f948a549f7b791a5b41915ee4d1ec3935357e4e2317250d0372afa2ebeeb3a"
        );
    }

    #[test]
    fn test_bybit_prehash_order() {
        assert_eq!(
            bybit_signature("secret", 1_700_000_000_000, "key", 5000, "").unwrap(),
            "409b3edd049b76dda5f93952b22658a4ccbd498ce7934755f12cb9249b80777a"
        );
    }

    #[test]
    fn test_mexc_query_signature() {
        assert_eq!(
            mexc_signature("secret", "timestamp=1700000000000&recvWindow=20000").unwrap(),
            "0fd5f702931ae9311c7115161296a4863d90337c8a0ef83213ba404553343849"
        );
    }

    #[test]
    fn test_whitebit_payload() {
        let body = br#"{"request":"/api/v4/main-account/fee","nonce":1700000000000}"#;
        let (payload, signature) = whitebit_payload("secret", body).unwrap();
        assert_eq!(
            payload,
            "eyJyZXF1ZXN0IjoiL2FwaS92NC9tYWluLWFjY291bnQvZmVlIiwibm9uY2UiOjE3MDAwMDAwMDAwMDB9"
        );
        assert_eq!(
            signature,
            "16afb29a457109facbb69e3fb1f0dc59461ba7305a26a20ce0a5f55f95e5d7dd\
             9e755f6f4fa85688c02880eea9e9a3125f3cebd16fbb04bcf1d79be26a145864"
        );
    }
}
