//! Navigation gate.

use std::sync::Arc;

use crate::navigation::NavigationExtras;
use crate::{Navigator, SessionError, SessionManager};

/// Allows navigation only for logged-in users.
///
/// A rejected navigation remembers its target as the post-login redirect
/// and sends the user to the login page.
pub struct AuthGuard {
    session: Arc<SessionManager>,
}

impl AuthGuard {
    /// Creates a guard over a session.
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }

    /// Gate for a route.
    pub async fn can_activate(&self, url: &str) -> Result<bool, SessionError> {
        self.check_login(url).await
    }

    /// Gate for a child route.
    pub async fn can_activate_child(&self, url: &str) -> Result<bool, SessionError> {
        self.check_login(url).await
    }

    /// Gate for a lazily loaded route segment (`path` has no leading `/`).
    pub async fn can_load(&self, path: &str) -> Result<bool, SessionError> {
        self.check_login(&format!("/{path}")).await
    }

    /// Returns whether a user is logged in; otherwise redirects to login.
    pub async fn check_login(&self, url: &str) -> Result<bool, SessionError> {
        if self.session.is_logged_in().await? {
            return Ok(true);
        }

        self.session.set_login_redirect_url(url);
        let login_url = self.session.configuration().login_url();
        self.session
            .navigator()
            .navigate(&login_url, NavigationExtras::default());
        Ok(false)
    }
}
