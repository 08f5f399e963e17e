//! Token exchange trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ExchangeError;

/// Body of a successful token endpoint response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Access token. A response without one is rejected by the session layer.
    #[serde(default)]
    pub access_token: Option<String>,
    /// New refresh token; absent means "keep the previous one".
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Access token lifetime in seconds, relative to receipt.
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Token type, normally `Bearer`.
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Performs the network round trip for the password and refresh grants.
///
/// Implementations must not touch session state; they only exchange
/// credentials for a [`TokenResponse`].
#[async_trait]
pub trait TokenExchangeClient: Send + Sync {
    /// Exchanges user credentials for tokens (`grant_type=password`).
    async fn login(&self, user_name: &str, password: &str)
        -> Result<TokenResponse, ExchangeError>;

    /// Exchanges a refresh token for new tokens (`grant_type=refresh_token`).
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, ExchangeError>;
}
