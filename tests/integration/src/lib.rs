//! Integration tests for Passgate.
//!
//! These tests run the session stack end to end against an in-process
//! identity provider: discovery, password and refresh grants, a protected
//! resource, and SQLite persistence.

// Allow unwrap() in tests - panics are acceptable for test assertions
#![allow(clippy::disallowed_methods)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};

use passgate_claims::unix_now;
use passgate_oidc::{OidcConfig, OidcTokenClient};
use passgate_session::{RecordingNavigator, SessionManager, StaticConfiguration};
use passgate_storage_sqlite::SqliteStorage;

/// Client ID the mock provider accepts.
pub const CLIENT_ID: &str = "passgate_spa";

// ============================================================================
// Mock Identity Provider
// ============================================================================

#[derive(Default)]
struct ProviderState {
    users: HashMap<String, String>,
    access_tokens: HashSet<String>,
    refresh_tokens: HashSet<String>,
    generation: u64,
    discovery_requests: usize,
    password_grants: usize,
    refresh_grants: usize,
    refresh_delay: Option<Duration>,
}

#[derive(Clone)]
struct AppState {
    base_url: String,
    inner: Arc<Mutex<ProviderState>>,
}

/// An identity provider bound to a random local port.
pub struct MockIdentityProvider {
    addr: SocketAddr,
    state: AppState,
}

impl MockIdentityProvider {
    /// Start a provider with a single user `jdoe` / `secret`.
    pub async fn start() -> Result<Self> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .context("Failed to bind mock provider")?;
        let addr = listener.local_addr()?;

        let mut provider = ProviderState::default();
        provider.users.insert("jdoe".to_string(), "secret".to_string());

        let state = AppState {
            base_url: format!("http://{addr}"),
            inner: Arc::new(Mutex::new(provider)),
        };

        let app = Router::new()
            .route("/.well-known/openid-configuration", get(discovery))
            .route("/connect/token", post(token))
            .route("/api/profile", get(profile))
            .with_state(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Ok(Self { addr, state })
    }

    /// Base URL (issuer) of the provider.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// URL of the bearer-protected resource.
    pub fn profile_url(&self) -> String {
        format!("{}/api/profile", self.base_url())
    }

    /// Invalidate every issued access token.
    pub fn expire_access_tokens(&self) {
        self.state.inner.lock().unwrap().access_tokens.clear();
    }

    /// Invalidate every issued refresh token.
    pub fn revoke_refresh_tokens(&self) {
        self.state.inner.lock().unwrap().refresh_tokens.clear();
    }

    /// Slow down refresh grants.
    pub fn delay_refresh(&self, delay: Duration) {
        self.state.inner.lock().unwrap().refresh_delay = Some(delay);
    }

    pub fn discovery_requests(&self) -> usize {
        self.state.inner.lock().unwrap().discovery_requests
    }

    pub fn password_grants(&self) -> usize {
        self.state.inner.lock().unwrap().password_grants
    }

    pub fn refresh_grants(&self) -> usize {
        self.state.inner.lock().unwrap().refresh_grants
    }
}

fn oauth_error(status: StatusCode, error: &str, description: &str) -> Response {
    (
        status,
        Json(json!({ "error": error, "error_description": description })),
    )
        .into_response()
}

/// Mint a token pair for `user` and register it as valid.
fn issue_tokens(provider: &mut ProviderState, user: &str) -> Value {
    provider.generation += 1;
    let now = unix_now();
    let claims = json!({
        "sub": format!("id-{user}"),
        "name": user,
        "fullname": "John Doe",
        "email": format!("{user}@example.com"),
        "jobtitle": "Engineer",
        "role": "user",
        "permission": ["users.view", "roles.view"],
        "configuration": "{\"theme\":\"dark\"}",
        "iat": now,
        "exp": now + 300,
        "jti": provider.generation.to_string()
    });
    let access_token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"mock-provider-key"),
    )
    .unwrap();
    let refresh_token = format!("refresh-{user}-{}", provider.generation);

    provider.access_tokens.insert(access_token.clone());
    provider.refresh_tokens.insert(refresh_token.clone());

    json!({
        "access_token": access_token,
        "refresh_token": refresh_token,
        "expires_in": 300,
        "token_type": "Bearer"
    })
}

async fn discovery(State(state): State<AppState>) -> Json<Value> {
    state.inner.lock().unwrap().discovery_requests += 1;
    Json(json!({
        "issuer": state.base_url,
        "token_endpoint": format!("{}/connect/token", state.base_url)
    }))
}

async fn token(State(state): State<AppState>, Form(form): Form<HashMap<String, String>>) -> Response {
    if form.get("client_id").map(String::as_str) != Some(CLIENT_ID) {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_client", "Unknown client.");
    }

    match form.get("grant_type").map(String::as_str) {
        Some("password") => {
            let mut provider = state.inner.lock().unwrap();
            provider.password_grants += 1;

            let user = form.get("username").cloned().unwrap_or_default();
            let password = form.get("password").cloned().unwrap_or_default();
            if provider.users.get(&user) != Some(&password) {
                return oauth_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_grant",
                    "The username/password couple is invalid.",
                );
            }
            Json(issue_tokens(&mut provider, &user)).into_response()
        },
        Some("refresh_token") => {
            let delay = {
                let mut provider = state.inner.lock().unwrap();
                provider.refresh_grants += 1;
                provider.refresh_delay
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let mut provider = state.inner.lock().unwrap();
            let refresh_token = form.get("refresh_token").cloned().unwrap_or_default();
            // Refresh tokens rotate: each one is good for a single use.
            if !provider.refresh_tokens.remove(&refresh_token) {
                return oauth_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_grant",
                    "The refresh token is no longer valid.",
                );
            }
            let user = refresh_token
                .strip_prefix("refresh-")
                .and_then(|rest| rest.rsplit_once('-'))
                .map(|(user, _)| user.to_string())
                .unwrap_or_default();
            Json(issue_tokens(&mut provider, &user)).into_response()
        },
        _ => oauth_error(
            StatusCode::BAD_REQUEST,
            "unsupported_grant_type",
            "The grant type is not supported.",
        ),
    }
}

async fn profile(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default()
        .to_string();

    if !state.inner.lock().unwrap().access_tokens.contains(&token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let claims = passgate_claims::decode(&token).unwrap();
    Json(json!({ "user": claims.name })).into_response()
}

// ============================================================================
// Session Wiring
// ============================================================================

/// A session manager wired to SQLite storage and the HTTP token client.
pub struct TestSession {
    pub session: Arc<SessionManager>,
    pub navigator: Arc<RecordingNavigator>,
    pub configuration: Arc<StaticConfiguration>,
}

impl TestSession {
    /// Open the `profile` session stored under `data_dir`.
    pub async fn open(provider: &MockIdentityProvider, data_dir: &Path, profile: &str) -> Result<Self> {
        let config = OidcConfig::new(provider.base_url());
        Self::open_with(config, &provider.base_url(), data_dir, profile).await
    }

    pub async fn open_with(
        config: OidcConfig,
        base_url: &str,
        data_dir: &Path,
        profile: &str,
    ) -> Result<Self> {
        let storage = SqliteStorage::open(data_dir, profile).await?;
        let navigator = Arc::new(RecordingNavigator::default());
        let configuration = Arc::new(StaticConfiguration::new(base_url));

        let session = SessionManager::new(
            Arc::new(storage),
            Arc::new(OidcTokenClient::new(config)),
            configuration.clone(),
            navigator.clone(),
        );

        Ok(Self {
            session: Arc::new(session),
            navigator,
            configuration,
        })
    }
}

/// GET a protected URL with a bearer token.
pub async fn fetch_profile(
    http: &reqwest::Client,
    url: &str,
    token: String,
) -> Result<Value, reqwest::Error> {
    http.get(url)
        .bearer_auth(token)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use passgate_session::{GuardError, Navigator, RequestGuard, SessionError};
    use tempfile::TempDir;

    async fn setup() -> (MockIdentityProvider, TempDir) {
        let provider = MockIdentityProvider::start().await.unwrap();
        let data_dir = TempDir::new().unwrap();
        (provider, data_dir)
    }

    #[tokio::test]
    async fn test_login_through_discovery() {
        let (provider, data_dir) = setup().await;
        let t = TestSession::open(&provider, data_dir.path(), "default").await.unwrap();

        let principal = t.session.login("jdoe", "secret", true).await.unwrap();

        assert_eq!(principal.user_name, "jdoe");
        assert_eq!(principal.friendly_name(), "Engineer John Doe");
        assert!(principal.has_role("user"));
        assert_eq!(
            t.session.user_permissions().await.unwrap(),
            vec!["users.view", "roles.view"]
        );
        assert!(!t.session.is_session_expired().await.unwrap());
        assert_eq!(t.configuration.get("theme"), Some(json!("dark")));
        assert_eq!(provider.discovery_requests(), 1);
        assert_eq!(provider.password_grants(), 1);
    }

    #[tokio::test]
    async fn test_explicit_token_endpoint_skips_discovery() {
        let (provider, data_dir) = setup().await;
        let config = OidcConfig::new(provider.base_url())
            .with_token_endpoint(format!("{}/connect/token", provider.base_url()));
        let t = TestSession::open_with(config, &provider.base_url(), data_dir.path(), "default")
            .await
            .unwrap();

        t.session.login("jdoe", "secret", false).await.unwrap();

        assert_eq!(provider.discovery_requests(), 0);
    }

    #[tokio::test]
    async fn test_wrong_password() {
        let (provider, data_dir) = setup().await;
        let t = TestSession::open(&provider, data_dir.path(), "default").await.unwrap();

        let err = t.session.login("jdoe", "nope", true).await.unwrap_err();

        match err {
            SessionError::Exchange(e) => {
                assert!(e.is_invalid_grant());
                assert_eq!(e.status(), Some(400));
                assert_eq!(
                    e.error_description(),
                    Some("The username/password couple is invalid.")
                );
            },
            other => panic!("unexpected error: {other}"),
        }
        assert!(!t.session.is_logged_in().await.unwrap());
    }

    #[tokio::test]
    async fn test_remembered_session_survives_restart() {
        let (provider, data_dir) = setup().await;
        {
            let t = TestSession::open(&provider, data_dir.path(), "default").await.unwrap();
            t.session.login("jdoe", "secret", true).await.unwrap();
        }

        let t = TestSession::open(&provider, data_dir.path(), "default").await.unwrap();

        assert!(t.session.is_logged_in().await.unwrap());
        assert!(t.session.remember_me().await.unwrap());
        assert!(t.session.refresh_token().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_session_scoped_login_is_forgotten_on_restart() {
        let (provider, data_dir) = setup().await;
        {
            let t = TestSession::open(&provider, data_dir.path(), "default").await.unwrap();
            t.session.login("jdoe", "secret", false).await.unwrap();
            assert!(t.session.is_logged_in().await.unwrap());
        }

        let t = TestSession::open(&provider, data_dir.path(), "default").await.unwrap();

        assert!(!t.session.is_logged_in().await.unwrap());
        assert!(!t.session.remember_me().await.unwrap());
    }

    #[tokio::test]
    async fn test_logout_clears_store() {
        let (provider, data_dir) = setup().await;
        let t = TestSession::open(&provider, data_dir.path(), "default").await.unwrap();
        t.session.login("jdoe", "secret", true).await.unwrap();

        t.session.logout(false).await.unwrap();

        let reopened = TestSession::open(&provider, data_dir.path(), "default").await.unwrap();
        let record = reopened.session.session_record().await.unwrap();
        assert!(record.principal.is_none());
        assert!(record.access_token.is_none());
        assert!(record.refresh_token.is_none());
        assert!(record.permissions.is_empty());
    }

    #[tokio::test]
    async fn test_guarded_request_refreshes_expired_token() {
        let (provider, data_dir) = setup().await;
        let t = TestSession::open(&provider, data_dir.path(), "default").await.unwrap();
        t.session.login("jdoe", "secret", true).await.unwrap();
        let first_refresh = t.session.refresh_token().await.unwrap();
        let guard = RequestGuard::new(t.session.clone());
        let http = reqwest::Client::new();
        let url = provider.profile_url();

        provider.expire_access_tokens();
        let body = guard
            .execute_authorized(|token| fetch_profile(&http, &url, token))
            .await
            .unwrap();

        assert_eq!(body, json!({ "user": "jdoe" }));
        assert_eq!(provider.refresh_grants(), 1);
        // Rotated refresh token was stored.
        assert_ne!(t.session.refresh_token().await.unwrap(), first_refresh);
    }

    #[tokio::test]
    async fn test_concurrent_expired_requests_refresh_once() {
        let (provider, data_dir) = setup().await;
        let t = TestSession::open(&provider, data_dir.path(), "default").await.unwrap();
        t.session.login("jdoe", "secret", false).await.unwrap();
        let guard = RequestGuard::new(t.session.clone());
        let http = reqwest::Client::new();
        let url = provider.profile_url();

        provider.expire_access_tokens();
        provider.delay_refresh(Duration::from_millis(200));

        let (a, b, c) = tokio::join!(
            guard.execute_authorized(|token| fetch_profile(&http, &url, token)),
            guard.execute_authorized(|token| fetch_profile(&http, &url, token)),
            guard.execute_authorized(|token| fetch_profile(&http, &url, token)),
        );

        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(provider.refresh_grants(), 1);
    }

    #[tokio::test]
    async fn test_revoked_refresh_token_expires_session() {
        let (provider, data_dir) = setup().await;
        let t = TestSession::open(&provider, data_dir.path(), "default").await.unwrap();
        t.session.login("jdoe", "secret", true).await.unwrap();
        t.session.goto_page("/reports", false);
        let guard = RequestGuard::new(t.session.clone());
        let http = reqwest::Client::new();
        let url = provider.profile_url();

        provider.expire_access_tokens();
        provider.revoke_refresh_tokens();

        let result = guard
            .execute_authorized(|token| fetch_profile(&http, &url, token))
            .await;

        assert!(matches!(
            result,
            Err(GuardError::SessionExpired(Some(ref reason))) if reason == "The refresh token is no longer valid."
        ));
        assert_eq!(t.navigator.current_url(), "/login");
        assert_eq!(t.session.login_redirect_url().as_deref(), Some("/reports"));

        // Logging in again brings the user back where they were.
        t.session.login("jdoe", "secret", true).await.unwrap();
        t.session.redirect_login_user();
        assert_eq!(t.navigator.current_url(), "/reports");
    }

    #[tokio::test]
    async fn test_profiles_are_isolated() {
        let (provider, data_dir) = setup().await;
        let work = TestSession::open(&provider, data_dir.path(), "work").await.unwrap();
        work.session.login("jdoe", "secret", true).await.unwrap();

        let home = TestSession::open(&provider, data_dir.path(), "home").await.unwrap();

        assert!(!home.session.is_logged_in().await.unwrap());
        assert!(work.session.is_logged_in().await.unwrap());
    }
}
