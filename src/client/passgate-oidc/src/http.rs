//! `reqwest`-based token exchange client.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::{ExchangeError, OidcConfig, TokenExchangeClient, TokenResponse};

/// The part of the discovery document the client needs.
#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    #[serde(default)]
    issuer: Option<String>,
    token_endpoint: String,
}

/// OAuth2 error body (RFC 6749 section 5.2).
#[derive(Debug, Default, Deserialize)]
struct OAuthErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Token exchange client talking to an OIDC provider over HTTP.
pub struct OidcTokenClient {
    config: OidcConfig,
    http: reqwest::Client,
    /// Token endpoint found through discovery, loaded once.
    discovered: RwLock<Option<String>>,
}

impl OidcTokenClient {
    /// Creates a client for the given configuration.
    pub fn new(config: OidcConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            discovered: RwLock::new(None),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &OidcConfig {
        &self.config
    }

    /// Resolves the token endpoint, loading the discovery document if needed.
    pub async fn token_endpoint(&self) -> Result<String, ExchangeError> {
        if let Some(endpoint) = self.config.token_endpoint() {
            return Ok(endpoint.to_string());
        }

        if let Some(endpoint) = self.discovered.read().await.as_ref() {
            return Ok(endpoint.clone());
        }

        let url = self.config.discovery_url();
        debug!(url = %url, "Loading discovery document");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ExchangeError::Discovery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ExchangeError::Discovery(format!(
                "{url} returned HTTP {}",
                response.status().as_u16()
            )));
        }

        let document: DiscoveryDocument = response
            .json()
            .await
            .map_err(|e| ExchangeError::Discovery(e.to_string()))?;

        if let Some(issuer) = document.issuer.as_deref() {
            if issuer.trim_end_matches('/') != self.config.issuer() {
                warn!(
                    expected = %self.config.issuer(),
                    actual = %issuer,
                    "Discovery document issuer does not match configuration"
                );
            }
        }

        let mut cache = self.discovered.write().await;
        *cache = Some(document.token_endpoint.clone());

        Ok(document.token_endpoint)
    }

    /// Posts a form to the token endpoint and parses the token response.
    async fn post_token_form(
        &self,
        params: &[(&str, &str)],
        operation: &'static str,
    ) -> Result<TokenResponse, ExchangeError> {
        let endpoint = self.token_endpoint().await?;

        let response = self.http.post(&endpoint).form(params).send().await?;
        let response = Self::ensure_success(response, operation).await?;

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))
    }

    /// Checks HTTP response status; returns the response on success or an error with details.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, ExchangeError> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let parsed: OAuthErrorBody = serde_json::from_str(&body).unwrap_or_default();

        debug!(
            operation,
            status,
            error = parsed.error.as_deref().unwrap_or("-"),
            "Token endpoint rejected request"
        );

        Err(ExchangeError::Http {
            status,
            error: parsed.error,
            error_description: parsed.error_description,
            body,
        })
    }
}

#[async_trait]
impl TokenExchangeClient for OidcTokenClient {
    async fn login(
        &self,
        user_name: &str,
        password: &str,
    ) -> Result<TokenResponse, ExchangeError> {
        let params = [
            ("username", user_name),
            ("password", password),
            ("client_id", self.config.client_id()),
            ("grant_type", "password"),
            ("scope", self.config.scope()),
        ];
        self.post_token_form(&params, "password grant").await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, ExchangeError> {
        let params = [
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id()),
            ("grant_type", "refresh_token"),
        ];
        self.post_token_form(&params, "refresh grant").await
    }
}
