//! Access token expiry checks
//!
//! Tokens are JWTs; only the `exp` claim of the payload is read. The
//! signature is not verified here, that is the server's job.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use std::time::Duration;

#[derive(Deserialize)]
struct Claims {
    exp: Option<f64>,
}

/// Expiry of a token in epoch seconds, if its payload can be decoded
pub fn token_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    claims.exp.filter(|exp| exp.is_finite()).map(|exp| exp as i64)
}

/// Whether `token` expires within `buffer` of `now` (epoch seconds).
///
/// A token that cannot be decoded, or has no `exp`, counts as expiring.
pub fn is_expiring_soon_at(token: &str, buffer: Duration, now: i64) -> bool {
    match token_expiry(token) {
        Some(exp) => exp <= now.saturating_add(buffer.as_secs() as i64),
        None => true,
    }
}

/// Whether `token` expires within `buffer` from now
pub fn is_expiring_soon(token: &str, buffer: Duration) -> bool {
    is_expiring_soon_at(token, buffer, chrono::Utc::now().timestamp())
}

#[cfg(test)]
pub(crate) fn test_token(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"user-1","exp":{}}}"#, exp));
    format!("{}.{}.signature", header, payload)
}
