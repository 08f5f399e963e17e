//! Shared fixtures for unit tests.

#![allow(clippy::disallowed_methods)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};

use passgate_claims::unix_now;
use passgate_oidc::{ExchangeError, TokenExchangeClient, TokenResponse};
use passgate_storage::MemoryStorage;

use crate::{AppConfiguration, RecordingNavigator, SessionError, SessionManager, StaticConfiguration};

/// Signs `claims` into a compact JWT.
pub(crate) fn access_token(claims: Value) -> String {
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"test-secret"),
    )
    .unwrap()
}

pub(crate) fn token_response(
    access_token: &str,
    refresh_token: Option<&str>,
    expires_in: Option<u64>,
) -> TokenResponse {
    TokenResponse {
        access_token: Some(access_token.to_string()),
        refresh_token: refresh_token.map(str::to_string),
        expires_in,
        token_type: Some("Bearer".to_string()),
    }
}

fn user_token(user_name: &str, generation: usize) -> String {
    access_token(json!({
        "sub": "u-1",
        "name": user_name,
        "fullname": "John Doe",
        "email": "jdoe@example.com",
        "role": ["user"],
        "permission": ["users.view", "roles.view"],
        "configuration": { "theme": "light" },
        "jti": generation.to_string(),
        "exp": unix_now() + 3600
    }))
}

/// Token exchange that answers locally and counts calls.
#[derive(Default)]
pub(crate) struct StubExchange {
    login_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    login_error: Mutex<Option<ExchangeError>>,
    refresh_error: Mutex<Option<ExchangeError>>,
    refresh_delay: Mutex<Option<Duration>>,
}

impl StubExchange {
    pub(crate) fn fail_login(&self, error: ExchangeError) {
        *self.login_error.lock().unwrap() = Some(error);
    }

    pub(crate) fn fail_refresh(&self, error: ExchangeError) {
        *self.refresh_error.lock().unwrap() = Some(error);
    }

    pub(crate) fn delay_refresh(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = Some(delay);
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenExchangeClient for StubExchange {
    async fn login(&self, user_name: &str, _password: &str) -> Result<TokenResponse, ExchangeError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.login_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(token_response(&user_token(user_name, 0), Some("refresh-0"), Some(3600)))
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<TokenResponse, ExchangeError> {
        let generation = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;

        let delay = *self.refresh_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.refresh_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(token_response(
            &user_token("jdoe", generation),
            Some(&format!("refresh-{generation}")),
            Some(3600),
        ))
    }
}

/// Configuration that counts imports and local-change resets.
pub(crate) struct CountingConfiguration {
    inner: StaticConfiguration,
    imports: AtomicUsize,
    cleared: AtomicUsize,
}

impl CountingConfiguration {
    pub(crate) fn imports(&self) -> usize {
        self.imports.load(Ordering::SeqCst)
    }

    pub(crate) fn cleared(&self) -> usize {
        self.cleared.load(Ordering::SeqCst)
    }
}

impl AppConfiguration for CountingConfiguration {
    fn login_url(&self) -> String {
        self.inner.login_url()
    }

    fn home_url(&self) -> String {
        self.inner.home_url()
    }

    fn base_url(&self) -> String {
        self.inner.base_url()
    }

    fn import(&self, configuration: Option<&Value>) -> Result<(), SessionError> {
        self.imports.fetch_add(1, Ordering::SeqCst);
        self.inner.import(configuration)
    }

    fn clear_local_changes(&self) -> Result<(), SessionError> {
        self.cleared.fetch_add(1, Ordering::SeqCst);
        self.inner.clear_local_changes()
    }
}

pub(crate) struct Harness {
    pub session: Arc<SessionManager>,
    pub storage: MemoryStorage,
    pub exchange: Arc<StubExchange>,
    pub configuration: Arc<CountingConfiguration>,
    pub navigator: Arc<RecordingNavigator>,
}

impl Harness {
    pub(crate) fn with_storage(storage: MemoryStorage) -> Self {
        let exchange = Arc::new(StubExchange::default());
        let configuration = Arc::new(CountingConfiguration {
            inner: StaticConfiguration::new("https://id.example.com"),
            imports: AtomicUsize::new(0),
            cleared: AtomicUsize::new(0),
        });
        let navigator = Arc::new(RecordingNavigator::default());

        let session = Arc::new(SessionManager::new(
            Arc::new(storage.clone()),
            exchange.clone(),
            configuration.clone(),
            navigator.clone(),
        ));

        Self {
            session,
            storage,
            exchange,
            configuration,
            navigator,
        }
    }
}

/// A harness over ready memory storage whose initial status emission has
/// already gone out.
pub(crate) async fn harness() -> Harness {
    let h = Harness::with_storage(MemoryStorage::new());
    tokio::task::yield_now().await;
    h
}
