//! Compact token payload decoding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;
use tracing::debug;

use crate::{Claims, ClaimsError};

/// Returns the current Unix timestamp.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Decodes a base64url segment into UTF-8 text.
///
/// The segment is mapped onto the standard alphabet and padded to a multiple
/// of four. A segment whose length leaves a remainder of one can never be
/// valid base64 and is rejected.
pub fn url_base64_decode(segment: &str) -> Result<String, ClaimsError> {
    let mut output: String = segment
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();

    match output.len() % 4 {
        0 => {},
        2 => output.push_str("=="),
        3 => output.push('='),
        _ => return Err(ClaimsError::MalformedToken("illegal base64url string".into())),
    }

    let bytes = STANDARD
        .decode(output.as_bytes())
        .map_err(|e| ClaimsError::MalformedToken(format!("invalid base64: {e}")))?;

    String::from_utf8(bytes)
        .map_err(|_| ClaimsError::MalformedToken("payload is not valid UTF-8".into()))
}

fn payload_text(token: &str) -> Result<String, ClaimsError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        debug!(segments = parts.len(), "Rejecting token with wrong segment count");
        return Err(ClaimsError::MalformedToken(format!(
            "expected 3 segments, got {}",
            parts.len()
        )));
    }

    let decoded = url_base64_decode(parts[1])?;
    if decoded.is_empty() {
        return Err(ClaimsError::MalformedToken("cannot decode the token".into()));
    }

    Ok(decoded)
}

/// Decodes the payload of `token` into typed [`Claims`].
///
/// No signature verification is performed.
///
/// # Errors
///
/// Returns [`ClaimsError::MalformedToken`] if the token does not have exactly
/// three segments, or the payload is not base64url-encoded UTF-8 JSON.
pub fn decode(token: &str) -> Result<Claims, ClaimsError> {
    let payload = payload_text(token)?;
    serde_json::from_str(&payload).map_err(|e| {
        debug!(error = %e, "Token payload is not a claims object");
        ClaimsError::MalformedToken(format!("invalid claims: {e}"))
    })
}

/// Decodes the payload of `token` into raw JSON.
pub fn decode_value(token: &str) -> Result<Value, ClaimsError> {
    let payload = payload_text(token)?;
    serde_json::from_str(&payload)
        .map_err(|e| ClaimsError::MalformedToken(format!("invalid json: {e}")))
}

/// Returns the `exp` claim of `token` (Unix seconds), if any.
pub fn expiration_of(token: &str) -> Result<Option<u64>, ClaimsError> {
    Ok(decode(token)?.exp)
}

/// Checks whether `token` is expired, or will be within `offset_secs`.
///
/// A token without an `exp` claim never expires.
pub fn is_expired(token: &str, offset_secs: u64) -> Result<bool, ClaimsError> {
    is_expired_at(token, offset_secs, unix_now())
}

/// Same as [`is_expired`] with an explicit current time.
pub fn is_expired_at(token: &str, offset_secs: u64, now: u64) -> Result<bool, ClaimsError> {
    Ok(match expiration_of(token)? {
        Some(exp) => now.saturating_add(offset_secs) >= exp,
        None => false,
    })
}
