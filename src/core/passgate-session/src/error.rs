//! Session error types.

use thiserror::Error;

use passgate_claims::ClaimsError;
use passgate_oidc::ExchangeError;
use passgate_storage::StorageError;

/// Errors that can occur while managing a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The access token payload could not be decoded.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// The token endpoint answered without a required field.
    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    /// A refresh was requested but no refresh token is stored.
    #[error("no refresh token stored")]
    NoRefreshToken,

    /// The token exchange failed.
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// Session storage failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A stored value could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The configuration collaborator failed.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<ClaimsError> for SessionError {
    fn from(e: ClaimsError) -> Self {
        match e {
            ClaimsError::MalformedToken(msg) => SessionError::MalformedToken(msg),
        }
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        SessionError::Serialization(e.to_string())
    }
}
