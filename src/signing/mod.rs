//! Request signing for exchange REST APIs.
//!
//! - Binance: hex HMAC-SHA256 of the query string, sent as `signature`.
//! - KuCoin (key version 2): base64 HMAC-SHA256 of
//!   `timestamp + METHOD + path + body`, with the passphrase itself signed too.

use std::time::Instant;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::ExchangeError;
use crate::metrics;

type HmacSha256 = Hmac<Sha256>;

/// Raw HMAC-SHA256 digest.
pub fn hmac_sha256(secret: &str, payload: &str) -> Result<Vec<u8>, ExchangeError> {
    let start = Instant::now();
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::Signing(format!("invalid hmac key: {e}")))?;
    mac.update(payload.as_bytes());
    let digest = mac.finalize().into_bytes().to_vec();
    metrics::record_signing_latency(start);
    Ok(digest)
}

/// Binance `signature` parameter for a query string.
pub fn binance_signature(secret: &str, query: &str) -> Result<String, ExchangeError> {
    Ok(hex::encode(hmac_sha256(secret, query)?))
}

/// KuCoin `KC-API-SIGN` header value.
pub fn kucoin_signature(
    secret: &str,
    timestamp_ms: &str,
    method: &str,
    path_with_query: &str,
    body: &str,
) -> Result<String, ExchangeError> {
    let prehash = format!("{timestamp_ms}{}{path_with_query}{body}", method.to_uppercase());
    Ok(BASE64.encode(hmac_sha256(secret, &prehash)?))
}

/// KuCoin `KC-API-PASSPHRASE` header value for key version 2.
pub fn kucoin_passphrase(secret: &str, passphrase: &str) -> Result<String, ExchangeError> {
    Ok(BASE64.encode(hmac_sha256(secret, passphrase)?))
}

/// Current Unix time in milliseconds, as the exchanges expect it.
pub fn timestamp_ms() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binance_signature_matches_documented_example() {
        // Example from the Binance API documentation (SIGNED endpoint security).
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";

        let signature = binance_signature(secret, query).unwrap();

        assert_eq!(
            signature,
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn kucoin_signature_is_base64_sha256() {
        let signature =
            kucoin_signature("secret", "1700000000000", "post", "/api/v1/orders", "{}").unwrap();
        let decoded = BASE64.decode(signature).unwrap();
        assert_eq!(decoded.len(), 32);
    }

    #[test]
    fn kucoin_signature_covers_method_case() {
        let lower = kucoin_signature("s", "1", "get", "/api/v1/accounts", "").unwrap();
        let upper = kucoin_signature("s", "1", "GET", "/api/v1/accounts", "").unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn passphrase_is_signed_with_secret() {
        let a = kucoin_passphrase("secret-a", "pass").unwrap();
        let b = kucoin_passphrase("secret-b", "pass").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn timestamp_is_milliseconds() {
        assert_eq!(timestamp_ms().len(), 13);
    }
}
