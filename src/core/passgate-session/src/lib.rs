//! # Passgate Session
//!
//! Client-side session management for the OAuth2 password grant.
//!
//! ## Components
//!
//! - [`SessionManager`]: login / refresh / logout state machine, persisted
//!   through a [`SessionStorage`](passgate_storage::SessionStorage)
//! - [`RequestGuard`]: wraps authenticated calls and recovers from a 401 with
//!   a single shared token refresh
//! - [`AuthGuard`]: navigation gate driven by login state
//!
//! Collaborators (storage, token exchange, app configuration, navigation)
//! are injected as trait objects.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod configuration;
pub mod error;
pub mod manager;
pub mod navigation;
pub mod principal;
pub mod request_guard;
pub mod route_guard;

#[cfg(test)]
mod testing;

pub use configuration::{AppConfiguration, StaticConfiguration};
pub use error::SessionError;
pub use manager::{ReLoginDelegate, SessionManager, SessionRecord};
pub use navigation::{
    parse_redirect_target, NavigationExtras, Navigator, QueryParamsHandling, RecordingNavigator,
    RedirectTarget,
};
pub use principal::{permission, Principal};
pub use request_guard::{AuthFailure, GuardError, RefreshOutcome, RequestGuard};
pub use route_guard::AuthGuard;
