//! Session lifecycle: login, refresh, commit, logout.
//!
//! A session is *Authenticated* while the storage holds a current user and
//! *Anonymous* otherwise; there is no other state. Every successful exchange
//! is committed as one storage batch, and the login status is broadcast only
//! after that batch has been written.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use passgate_claims::unix_now;
use passgate_oidc::{TokenExchangeClient, TokenResponse};
use passgate_storage::keys::{
    ACCESS_TOKEN, CURRENT_USER, REFRESH_TOKEN, REMEMBER_ME, SESSION_RECORD_KEYS,
    TOKEN_EXPIRES_IN, USER_PERMISSIONS,
};
use passgate_storage::{SessionStorage, SessionStorageExt, StorageTier};

use crate::navigation::{parse_redirect_target, NavigationExtras, QueryParamsHandling};
use crate::{AppConfiguration, Navigator, Principal, SessionError};

/// Capacity of the login status channel.
const STATUS_CHANNEL_CAPACITY: usize = 16;

/// Custom re-login action, replacing the default redirect to the login page.
pub type ReLoginDelegate = Arc<dyn Fn() + Send + Sync>;

/// Everything persisted for an authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// Bearer token for API calls.
    pub access_token: Option<String>,
    /// Token used to obtain new access tokens.
    pub refresh_token: Option<String>,
    /// Access token expiry (Unix seconds).
    pub access_token_expiry: Option<u64>,
    /// Permissions, in issuer order.
    pub permissions: Vec<String>,
    /// The authenticated user.
    pub principal: Option<Principal>,
    /// Whether the record lives in the permanent tier.
    pub remember_me: bool,
}

#[derive(Default)]
struct Redirects {
    login: Option<String>,
    logout: Option<String>,
}

/// Owns the session record and the login status channel.
pub struct SessionManager {
    storage: Arc<dyn SessionStorage>,
    exchange: Arc<dyn TokenExchangeClient>,
    configuration: Arc<dyn AppConfiguration>,
    navigator: Arc<dyn Navigator>,
    status: broadcast::Sender<bool>,
    redirects: Mutex<Redirects>,
    re_login_delegate: RwLock<Option<ReLoginDelegate>>,
}

impl SessionManager {
    /// Creates a session manager over the given collaborators.
    ///
    /// When called inside a Tokio runtime, a task is spawned that waits for
    /// the storage to become ready and then emits the login status once.
    pub fn new(
        storage: Arc<dyn SessionStorage>,
        exchange: Arc<dyn TokenExchangeClient>,
        configuration: Arc<dyn AppConfiguration>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let (status, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(initialize_login_status(storage.clone(), status.clone()));
        } else {
            debug!("No runtime available, initial login status will not be emitted");
        }

        Self {
            storage,
            exchange,
            configuration,
            navigator,
            status,
            redirects: Mutex::new(Redirects::default()),
            re_login_delegate: RwLock::new(None),
        }
    }

    /// Subscribes to login status changes.
    ///
    /// Only changes after the subscription are delivered.
    pub fn subscribe(&self) -> broadcast::Receiver<bool> {
        self.status.subscribe()
    }

    /// Routes and settings of the application.
    pub fn configuration(&self) -> &Arc<dyn AppConfiguration> {
        &self.configuration
    }

    /// The application router.
    pub fn navigator(&self) -> &Arc<dyn Navigator> {
        &self.navigator
    }

    // =========================================================================
    // Session transitions
    // =========================================================================

    /// Logs in with the password grant.
    ///
    /// Any previous session is discarded silently first. On failure the
    /// session stays anonymous and no status is emitted.
    pub async fn login(
        &self,
        user_name: &str,
        password: &str,
        remember_me: bool,
    ) -> Result<Principal, SessionError> {
        self.logout(true).await?;

        let response = self.exchange.login(user_name, password).await.map_err(|e| {
            debug!(error = %e, "Password grant failed");
            e
        })?;

        let principal = self.commit(response, Some(remember_me), false).await?;
        info!(user = %principal.user_name, remember_me, "Logged in");
        Ok(principal)
    }

    /// Exchanges the stored refresh token for new tokens.
    ///
    /// On failure the stored session is left untouched.
    pub async fn refresh(&self, silent: bool) -> Result<Principal, SessionError> {
        let refresh_token = self
            .refresh_token()
            .await?
            .ok_or(SessionError::NoRefreshToken)?;

        let response = self.exchange.refresh(&refresh_token).await.map_err(|e| {
            warn!(error = %e, "Token refresh failed");
            e
        })?;

        let principal = self.commit(response, None, silent).await?;
        debug!(user = %principal.user_name, "Session refreshed");
        Ok(principal)
    }

    /// Stores a token response as the current session.
    ///
    /// `remember_me` of `None` keeps the stored choice. User configuration
    /// carried by the token is imported only when no session existed before.
    pub async fn commit(
        &self,
        response: TokenResponse,
        remember_me: Option<bool>,
        silent: bool,
    ) -> Result<Principal, SessionError> {
        let access_token = response
            .access_token
            .ok_or_else(|| SessionError::InvalidResponse("missing access_token".to_string()))?;

        let remember_me = match remember_me {
            Some(explicit) => explicit,
            None => self.remember_me().await?,
        };
        let refresh_token = match response.refresh_token {
            Some(token) => Some(token),
            None => self.refresh_token().await?,
        };
        let expiry = unix_now().saturating_add(response.expires_in.unwrap_or(0));

        let claims = passgate_claims::decode(&access_token)?;

        if !self.is_logged_in().await? {
            self.configuration.import(claims.configuration.as_ref())?;
        }

        let principal = Principal::from_claims(&claims);

        let mut entries = vec![
            (ACCESS_TOKEN, to_json(&access_token)?),
            (REFRESH_TOKEN, to_json(&refresh_token)?),
            (TOKEN_EXPIRES_IN, to_json(&expiry)?),
            (USER_PERMISSIONS, to_json(&claims.permission)?),
            (CURRENT_USER, to_json(&principal)?),
        ];
        let remember_entry = (REMEMBER_ME, to_json(&remember_me)?);

        // The record moves wholesale: the tier not chosen must not shadow it.
        if remember_me {
            entries.push(remember_entry);
            self.storage
                .replace_batch(StorageTier::Permanent, &entries)
                .await?;
        } else {
            self.storage
                .replace_batch(StorageTier::Session, &entries)
                .await?;
            self.storage
                .save_batch(StorageTier::Permanent, &[remember_entry])
                .await?;
        }

        debug!(
            user = %principal.user_name,
            expiry,
            permissions = claims.permission.len(),
            "Session committed"
        );

        if !silent {
            self.emit_login_status(Some(&principal)).await?;
        }

        Ok(principal)
    }

    /// Removes the session record from both tiers.
    ///
    /// The remember-me choice is kept.
    pub async fn logout(&self, silent: bool) -> Result<(), SessionError> {
        self.storage.delete_batch(&SESSION_RECORD_KEYS).await?;
        self.configuration.clear_local_changes()?;

        if !silent {
            self.emit_login_status(None).await?;
            info!("Logged out");
        }
        Ok(())
    }

    /// Broadcasts whether a user is logged in.
    ///
    /// A given principal counts as logged in without a storage read.
    pub async fn emit_login_status(&self, principal: Option<&Principal>) -> Result<(), SessionError> {
        let logged_in = match principal {
            Some(_) => true,
            None => self.is_logged_in().await?,
        };
        // No subscribers is fine.
        let _ = self.status.send(logged_in);
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The logged-in user.
    pub async fn current_user(&self) -> Result<Option<Principal>, SessionError> {
        self.read(CURRENT_USER).await
    }

    /// Permissions of the logged-in user; empty when anonymous.
    pub async fn user_permissions(&self) -> Result<Vec<String>, SessionError> {
        Ok(self
            .read::<Vec<String>>(USER_PERMISSIONS)
            .await?
            .unwrap_or_default())
    }

    /// Current access token.
    pub async fn access_token(&self) -> Result<Option<String>, SessionError> {
        self.read(ACCESS_TOKEN).await
    }

    /// Current refresh token.
    pub async fn refresh_token(&self) -> Result<Option<String>, SessionError> {
        Ok(self.read::<Option<String>>(REFRESH_TOKEN).await?.flatten())
    }

    /// Access token expiry (Unix seconds).
    pub async fn access_token_expiry(&self) -> Result<Option<u64>, SessionError> {
        self.read(TOKEN_EXPIRES_IN).await
    }

    /// Whether the access token has expired, or no expiry is stored.
    pub async fn is_session_expired(&self) -> Result<bool, SessionError> {
        Ok(match self.access_token_expiry().await? {
            Some(expiry) => expiry <= unix_now(),
            None => true,
        })
    }

    /// Whether a user is stored. Token expiry is not considered.
    pub async fn is_logged_in(&self) -> Result<bool, SessionError> {
        Ok(self.current_user().await?.is_some())
    }

    /// Remember-me choice, read from the permanent tier.
    pub async fn remember_me(&self) -> Result<bool, SessionError> {
        Ok(self
            .storage
            .get_object::<bool>(REMEMBER_ME, true)
            .await?
            .unwrap_or(false))
    }

    /// Reads the whole session record from a single storage snapshot.
    pub async fn session_record(&self) -> Result<SessionRecord, SessionError> {
        let values = self.storage.get_many(&SESSION_RECORD_KEYS).await?;
        let [access_token, refresh_token, expiry, permissions, principal]: [Option<String>; 5] =
            values.try_into().map_err(|v: Vec<Option<String>>| {
                SessionError::Serialization(format!(
                    "expected {} values, storage returned {}",
                    SESSION_RECORD_KEYS.len(),
                    v.len()
                ))
            })?;

        Ok(SessionRecord {
            access_token: from_json(access_token)?,
            refresh_token: from_json::<Option<String>>(refresh_token)?.flatten(),
            access_token_expiry: from_json(expiry)?,
            permissions: from_json(permissions)?.unwrap_or_default(),
            principal: from_json(principal)?,
            remember_me: self.remember_me().await?,
        })
    }

    async fn read<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>, SessionError> {
        Ok(self.storage.get_object(key, false).await?)
    }

    // =========================================================================
    // Redirects
    // =========================================================================

    /// Remembers where to go after the next login.
    pub fn set_login_redirect_url(&self, url: impl Into<String>) {
        self.lock_redirects().login = Some(url.into());
    }

    /// Remembers where to go after the next logout.
    pub fn set_logout_redirect_url(&self, url: impl Into<String>) {
        self.lock_redirects().logout = Some(url.into());
    }

    /// Pending post-login URL.
    pub fn login_redirect_url(&self) -> Option<String> {
        self.lock_redirects().login.clone()
    }

    /// Pending post-logout URL.
    pub fn logout_redirect_url(&self) -> Option<String> {
        self.lock_redirects().logout.clone()
    }

    /// Navigates to the pending post-login URL, or home.
    ///
    /// The pending URL is used once. `/` and the login page itself fall back
    /// to home.
    pub fn redirect_login_user(&self) {
        let pending = self.lock_redirects().login.take();
        let login_url = self.configuration.login_url();

        let url = match pending {
            Some(url) if !url.is_empty() && url != "/" && url != login_url => url,
            _ => self.configuration.home_url(),
        };

        let target = parse_redirect_target(&url);
        self.navigator.navigate(
            &target.path,
            NavigationExtras {
                query_params: target.query_params,
                query_params_handling: QueryParamsHandling::Merge,
                fragment: target.fragment,
                preserve_fragment: false,
            },
        );
    }

    /// Navigates to the pending post-logout URL, or the login page.
    pub fn redirect_logout_user(&self) {
        let pending = self.lock_redirects().logout.take();
        let url = pending.unwrap_or_else(|| self.configuration.login_url());
        self.navigator.navigate(&url, NavigationExtras::default());
    }

    /// Sends the user to the login page, remembering where they were.
    ///
    /// Without `redirect_url` the navigator's current URL is remembered.
    pub fn redirect_for_login(&self, redirect_url: Option<&str>) {
        let url = match redirect_url {
            Some(url) => url.to_string(),
            None => self.navigator.current_url(),
        };
        self.lock_redirects().login = Some(url);
        self.navigator
            .navigate(&self.configuration.login_url(), NavigationExtras::default());
    }

    /// Navigates to the home page.
    pub fn goto_home_page(&self) {
        self.navigator
            .navigate(&self.configuration.home_url(), NavigationExtras::default());
    }

    /// Navigates to `page`, optionally keeping current query and fragment.
    pub fn goto_page(&self, page: &str, preserve_params: bool) {
        let extras = if preserve_params {
            NavigationExtras {
                query_params_handling: QueryParamsHandling::Merge,
                preserve_fragment: true,
                ..Default::default()
            }
        } else {
            NavigationExtras::default()
        };
        self.navigator.navigate(page, extras);
    }

    /// Installs a custom re-login action.
    pub fn set_re_login_delegate(&self, delegate: Option<ReLoginDelegate>) {
        *self
            .re_login_delegate
            .write()
            .unwrap_or_else(PoisonError::into_inner) = delegate;
    }

    /// Asks the user to log in again.
    ///
    /// Runs the custom delegate when one is installed, otherwise redirects
    /// to the login page.
    pub fn re_login(&self) {
        let delegate = self
            .re_login_delegate
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        info!("Session expired, asking for login");
        match delegate {
            Some(delegate) => delegate(),
            None => self.redirect_for_login(None),
        }
    }

    fn lock_redirects(&self) -> std::sync::MutexGuard<'_, Redirects> {
        self.redirects.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Emits the login status once the storage has loaded.
async fn initialize_login_status(storage: Arc<dyn SessionStorage>, status: broadcast::Sender<bool>) {
    if !storage.ready().wait().await {
        debug!("Storage closed before becoming ready");
        return;
    }

    match storage.get_value(CURRENT_USER).await {
        Ok(user) => {
            let _ = status.send(user.is_some());
        },
        Err(e) => warn!(error = %e, "Failed to read initial login status"),
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, SessionError> {
    Ok(serde_json::to_string(value)?)
}

fn from_json<T: DeserializeOwned>(raw: Option<String>) -> Result<Option<T>, SessionError> {
    raw.map(|text| serde_json::from_str(&text))
        .transpose()
        .map_err(SessionError::from)
}
