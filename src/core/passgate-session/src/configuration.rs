//! Application configuration collaborator.

use std::sync::{PoisonError, RwLock};

use serde_json::{Map, Value};
use tracing::debug;

use crate::SessionError;

/// Application configuration the session manager reads and feeds.
pub trait AppConfiguration: Send + Sync {
    /// Route of the login page.
    fn login_url(&self) -> String;

    /// Route of the home page.
    fn home_url(&self) -> String;

    /// Base URL of the identity provider / API.
    fn base_url(&self) -> String;

    /// Applies per-user settings carried by the access token.
    fn import(&self, configuration: Option<&Value>) -> Result<(), SessionError>;

    /// Drops settings changed locally during the session.
    fn clear_local_changes(&self) -> Result<(), SessionError>;
}

#[derive(Default)]
struct Settings {
    imported: Map<String, Value>,
    local: Map<String, Value>,
}

/// In-memory configuration with fixed routes.
///
/// Settings imported from the token form the base layer; [`set_local`]
/// overrides sit on top until [`clear_local_changes`] is called.
///
/// [`set_local`]: StaticConfiguration::set_local
/// [`clear_local_changes`]: AppConfiguration::clear_local_changes
pub struct StaticConfiguration {
    login_url: String,
    home_url: String,
    base_url: String,
    settings: RwLock<Settings>,
}

impl StaticConfiguration {
    /// Creates a configuration with `/login` and `/` routes.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            login_url: "/login".to_string(),
            home_url: "/".to_string(),
            base_url: base_url.into(),
            settings: RwLock::new(Settings::default()),
        }
    }

    /// Override the login route.
    #[must_use]
    pub fn with_login_url(mut self, url: impl Into<String>) -> Self {
        self.login_url = url.into();
        self
    }

    /// Override the home route.
    #[must_use]
    pub fn with_home_url(mut self, url: impl Into<String>) -> Self {
        self.home_url = url.into();
        self
    }

    /// Effective value of a setting: local override, else imported value.
    pub fn get(&self, key: &str) -> Option<Value> {
        let settings = self.settings.read().unwrap_or_else(PoisonError::into_inner);
        settings
            .local
            .get(key)
            .or_else(|| settings.imported.get(key))
            .cloned()
    }

    /// Changes a setting locally.
    pub fn set_local(&self, key: impl Into<String>, value: Value) {
        let mut settings = self.settings.write().unwrap_or_else(PoisonError::into_inner);
        settings.local.insert(key.into(), value);
    }

    /// Settings imported from the last fresh login.
    pub fn imported(&self) -> Map<String, Value> {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .imported
            .clone()
    }
}

impl AppConfiguration for StaticConfiguration {
    fn login_url(&self) -> String {
        self.login_url.clone()
    }

    fn home_url(&self) -> String {
        self.home_url.clone()
    }

    fn base_url(&self) -> String {
        self.base_url.clone()
    }

    fn import(&self, configuration: Option<&Value>) -> Result<(), SessionError> {
        let imported = match configuration {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            // Issuers commonly embed the settings as a JSON string.
            Some(Value::String(text)) if text.is_empty() => Map::new(),
            Some(Value::String(text)) => serde_json::from_str(text).map_err(|e| {
                SessionError::Configuration(format!("configuration claim is not an object: {e}"))
            })?,
            Some(other) => {
                return Err(SessionError::Configuration(format!(
                    "unsupported configuration claim: {other}"
                )))
            },
        };

        debug!(keys = imported.len(), "Importing user configuration");
        let mut settings = self.settings.write().unwrap_or_else(PoisonError::into_inner);
        settings.imported = imported;
        Ok(())
    }

    fn clear_local_changes(&self) -> Result<(), SessionError> {
        let mut settings = self.settings.write().unwrap_or_else(PoisonError::into_inner);
        settings.local.clear();
        Ok(())
    }
}
