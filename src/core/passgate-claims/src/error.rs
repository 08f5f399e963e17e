//! Claims decoding error types.

use thiserror::Error;

/// Errors that can occur while decoding a token payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaimsError {
    /// Wrong segment count, bad base64url, non UTF-8 or unparsable JSON.
    #[error("malformed token: {0}")]
    MalformedToken(String),
}
