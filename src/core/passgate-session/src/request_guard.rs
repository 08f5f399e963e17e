//! Authenticated call wrapper with 401 recovery.
//!
//! A call that fails with 401 triggers one token refresh; every other call
//! that hits 401 while that refresh is running parks on a completion slot
//! and is released with the refresher's outcome. Each recovered call is
//! re-issued exactly once.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use passgate_oidc::{ExchangeError, INVALID_GRANT};

use crate::{SessionError, SessionManager};

/// Classifies a call failure for the request guard.
pub trait AuthFailure {
    /// Whether the call was rejected with HTTP 401.
    fn is_unauthorized(&self) -> bool;

    /// OAuth2 `error` code carried by the failure.
    fn oauth_error(&self) -> Option<&str>;

    /// OAuth2 `error_description` carried by the failure.
    fn error_description(&self) -> Option<&str>;

    /// Whether the failure reports `invalid_grant`.
    fn is_invalid_grant(&self) -> bool {
        self.oauth_error() == Some(INVALID_GRANT)
    }
}

impl AuthFailure for ExchangeError {
    fn is_unauthorized(&self) -> bool {
        ExchangeError::is_unauthorized(self)
    }

    fn oauth_error(&self) -> Option<&str> {
        ExchangeError::oauth_error(self)
    }

    fn error_description(&self) -> Option<&str> {
        ExchangeError::error_description(self)
    }
}

impl AuthFailure for SessionError {
    fn is_unauthorized(&self) -> bool {
        matches!(self, SessionError::Exchange(e) if e.is_unauthorized())
    }

    fn oauth_error(&self) -> Option<&str> {
        match self {
            SessionError::Exchange(e) => e.oauth_error(),
            _ => None,
        }
    }

    fn error_description(&self) -> Option<&str> {
        match self {
            SessionError::Exchange(e) => e.error_description(),
            _ => None,
        }
    }
}

impl AuthFailure for reqwest::Error {
    fn is_unauthorized(&self) -> bool {
        self.status() == Some(reqwest::StatusCode::UNAUTHORIZED)
    }

    fn oauth_error(&self) -> Option<&str> {
        None
    }

    fn error_description(&self) -> Option<&str> {
        None
    }
}

/// Result of a guarded call that could not complete normally.
#[derive(Debug, Error)]
pub enum GuardError<E> {
    /// The session can no longer be refreshed; the user must log in again.
    #[error("session expired: {}", .0.as_deref().unwrap_or("please log in again"))]
    SessionExpired(Option<String>),

    /// The token refresh failed for a reason other than an expired grant.
    #[error("token refresh failed: {0}")]
    RefreshFailed(#[source] SessionError),

    /// The session could not be read.
    #[error("session error: {0}")]
    Session(#[source] SessionError),

    /// The call itself failed.
    #[error(transparent)]
    Call(E),
}

/// Outcome broadcast to callers parked behind a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// New tokens are stored; re-issue the call.
    Proceed,
    /// The refresh failed.
    Fail,
}

type Waiters = Vec<oneshot::Sender<RefreshOutcome>>;

/// Marks a refresh as in flight until dropped.
///
/// Dropping it empties the slot and answers every parked caller with the
/// recorded outcome, or [`RefreshOutcome::Fail`] when none was recorded
/// (the refresher was cancelled). The slot is emptied exactly once.
struct InFlight<'a> {
    slot: &'a Mutex<Option<Waiters>>,
    outcome: Option<RefreshOutcome>,
}

impl<'a> InFlight<'a> {
    fn new(slot: &'a Mutex<Option<Waiters>>) -> Self {
        Self {
            slot,
            outcome: None,
        }
    }

    fn release(mut self, outcome: RefreshOutcome) {
        self.outcome = Some(outcome);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let waiters = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_default();
        let outcome = self.outcome.unwrap_or(RefreshOutcome::Fail);
        debug!(waiters = waiters.len(), ?outcome, "Releasing parked calls");
        for waiter in waiters {
            // A waiter that went away needs no answer.
            let _ = waiter.send(outcome);
        }
    }
}

enum Role {
    Refresher,
    Waiter(oneshot::Receiver<RefreshOutcome>),
}

/// Wraps authenticated calls and recovers from expired access tokens.
pub struct RequestGuard {
    session: Arc<SessionManager>,
    refreshing: Mutex<Option<Waiters>>,
}

impl RequestGuard {
    /// Creates a guard over a session.
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self {
            session,
            refreshing: Mutex::new(None),
        }
    }

    /// The guarded session.
    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Runs `call`, refreshing the session and re-issuing the call once when
    /// it fails with 401.
    pub async fn execute<F, Fut, T, E>(&self, mut call: F) -> Result<T, GuardError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: AuthFailure,
    {
        match call().await {
            Err(e) if e.is_unauthorized() => {
                self.refresh_or_wait().await?;
                self.settle(call().await)
            },
            other => self.settle(other),
        }
    }

    /// Like [`execute`](Self::execute), passing the current access token to
    /// every attempt.
    ///
    /// Without a stored access token the user is sent to log in again.
    pub async fn execute_authorized<F, Fut, T, E>(&self, mut call: F) -> Result<T, GuardError<E>>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: AuthFailure,
    {
        let token = self.bearer_token().await?;
        match call(token).await {
            Err(e) if e.is_unauthorized() => {
                self.refresh_or_wait().await?;
                let token = self.bearer_token().await?;
                self.settle(call(token).await)
            },
            other => self.settle(other),
        }
    }

    /// JSON content negotiation headers, without credentials.
    pub fn api_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers
    }

    /// [`api_headers`](Self::api_headers) plus the bearer token when logged in.
    pub async fn bearer_headers(&self) -> Result<HeaderMap, SessionError> {
        let mut headers = Self::api_headers();

        if let Some(token) = self.session.access_token().await? {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                SessionError::MalformedToken("access token is not a valid header value".to_string())
            })?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Maps a call result without refreshing; a 401 here is returned as is.
    fn settle<T, E: AuthFailure>(&self, result: Result<T, E>) -> Result<T, GuardError<E>> {
        match result {
            Ok(value) => Ok(value),
            Err(e) if e.is_invalid_grant() => {
                self.session.re_login();
                Err(GuardError::SessionExpired(
                    e.error_description().map(str::to_string),
                ))
            },
            Err(e) => Err(GuardError::Call(e)),
        }
    }

    async fn bearer_token<E>(&self) -> Result<String, GuardError<E>> {
        match self.session.access_token().await.map_err(GuardError::Session)? {
            Some(token) => Ok(token),
            None => {
                self.session.re_login();
                Err(GuardError::SessionExpired(None))
            },
        }
    }

    /// Refreshes the session, or waits for the refresh already running.
    async fn refresh_or_wait<E>(&self) -> Result<(), GuardError<E>> {
        let role = {
            let mut slot = self
                .refreshing
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match slot.as_mut() {
                Some(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Role::Waiter(rx)
                },
                None => {
                    *slot = Some(Vec::new());
                    Role::Refresher
                },
            }
        };

        match role {
            Role::Waiter(rx) => {
                debug!("Refresh in flight, parking call");
                match rx.await {
                    Ok(RefreshOutcome::Proceed) => Ok(()),
                    Ok(RefreshOutcome::Fail) | Err(_) => Err(GuardError::SessionExpired(None)),
                }
            },
            Role::Refresher => {
                let in_flight = InFlight::new(&self.refreshing);
                debug!("Access token rejected, refreshing session");
                let result = self.session.refresh(true).await;

                match result {
                    Ok(_) => {
                        in_flight.release(RefreshOutcome::Proceed);
                        Ok(())
                    },
                    Err(e) => {
                        in_flight.release(RefreshOutcome::Fail);
                        warn!(error = %e, "Session refresh failed, asking for login");
                        self.session.re_login();
                        if e.is_unauthorized() || e.is_invalid_grant() {
                            Err(GuardError::SessionExpired(
                                e.error_description().map(str::to_string),
                            ))
                        } else {
                            Err(GuardError::RefreshFailed(e))
                        }
                    },
                }
            },
        }
    }
}
