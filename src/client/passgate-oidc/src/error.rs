//! Token exchange error types.

use thiserror::Error;

/// OAuth2 error code meaning the grant can never succeed again.
pub const INVALID_GRANT: &str = "invalid_grant";

/// Errors that can occur while talking to the identity provider.
#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    /// The endpoint answered with a non-success status.
    #[error("token endpoint returned HTTP {status}: {}", .error.as_deref().unwrap_or("unknown error"))]
    Http {
        /// HTTP status code.
        status: u16,
        /// OAuth2 `error` code from the body, if any.
        error: Option<String>,
        /// OAuth2 `error_description` from the body, if any.
        error_description: Option<String>,
        /// Raw response body.
        body: String,
    },

    /// Network or protocol failure before a response was read.
    #[error("transport error: {0}")]
    Transport(String),

    /// The discovery document could not be loaded.
    #[error("discovery failed: {0}")]
    Discovery(String),

    /// A success response whose body could not be parsed.
    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    /// Missing or invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ExchangeError {
    /// HTTP status of the failed response, if one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// OAuth2 `error` code, if the provider reported one.
    pub fn oauth_error(&self) -> Option<&str> {
        match self {
            Self::Http { error, .. } => error.as_deref(),
            _ => None,
        }
    }

    /// OAuth2 `error_description`, if the provider reported one.
    pub fn error_description(&self) -> Option<&str> {
        match self {
            Self::Http {
                error_description, ..
            } => error_description.as_deref(),
            _ => None,
        }
    }

    /// Whether the provider answered 401.
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    /// Whether the provider reported `invalid_grant`.
    pub fn is_invalid_grant(&self) -> bool {
        self.oauth_error() == Some(INVALID_GRANT)
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        ExchangeError::Transport(e.to_string())
    }
}
