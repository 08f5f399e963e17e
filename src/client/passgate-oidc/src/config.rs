//! Identity provider configuration.

use crate::ExchangeError;

/// Client ID used when none is configured.
pub const DEFAULT_CLIENT_ID: &str = "passgate_spa";

/// Scope requested by the password grant when none is configured.
pub const DEFAULT_SCOPE: &str = "openid email phone profile offline_access roles";

/// Configuration for the OIDC token client.
///
/// The issuer is a constructor parameter; everything else has a default and
/// can be overridden with the `with_*` methods.
#[derive(Debug, Clone)]
pub struct OidcConfig {
    pub(crate) issuer: String,
    pub(crate) client_id: String,
    pub(crate) scope: String,
    pub(crate) token_endpoint: Option<String>,
}

impl OidcConfig {
    /// Creates a configuration for the given issuer base URL.
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into().trim_end_matches('/').to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            scope: DEFAULT_SCOPE.to_string(),
            token_endpoint: None,
        }
    }

    /// Creates a configuration from environment variables.
    ///
    /// # Required env vars
    /// - `PASSGATE_ISSUER`: issuer base URL
    ///
    /// # Optional env vars
    /// - `PASSGATE_CLIENT_ID`: OAuth2 client ID
    /// - `PASSGATE_SCOPE`: space-separated scope for the password grant
    /// - `PASSGATE_TOKEN_ENDPOINT`: token endpoint URL (skips discovery)
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::Configuration`] if `PASSGATE_ISSUER` is missing.
    pub fn from_env() -> Result<Self, ExchangeError> {
        let issuer = std::env::var("PASSGATE_ISSUER")
            .map_err(|_| ExchangeError::Configuration("PASSGATE_ISSUER is required".into()))?;

        let mut config = Self::new(issuer);
        if let Ok(client_id) = std::env::var("PASSGATE_CLIENT_ID") {
            config = config.with_client_id(client_id);
        }
        if let Ok(scope) = std::env::var("PASSGATE_SCOPE") {
            config = config.with_scope(scope);
        }
        if let Ok(endpoint) = std::env::var("PASSGATE_TOKEN_ENDPOINT") {
            config = config.with_token_endpoint(endpoint);
        }
        Ok(config)
    }

    /// Override the client ID.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Override the password grant scope.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Use a fixed token endpoint instead of discovery.
    #[must_use]
    pub fn with_token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.token_endpoint = Some(endpoint.into());
        self
    }

    /// Issuer base URL, without trailing slash.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// OAuth2 client ID.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Scope requested by the password grant.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Fixed token endpoint, if configured.
    pub fn token_endpoint(&self) -> Option<&str> {
        self.token_endpoint.as_deref()
    }

    /// URL of the issuer's discovery document.
    pub fn discovery_url(&self) -> String {
        format!("{}/.well-known/openid-configuration", self.issuer)
    }
}
