//! Authenticated identity.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use passgate_claims::Claims;

/// Well-known permission names issued by the identity provider.
pub mod permission {
    /// May list users.
    pub const VIEW_USERS: &str = "users.view";
    /// May create, edit and delete users.
    pub const MANAGE_USERS: &str = "users.manage";
    /// May list roles.
    pub const VIEW_ROLES: &str = "roles.view";
    /// May create, edit and delete roles.
    pub const MANAGE_ROLES: &str = "roles.manage";
    /// May assign roles to users.
    pub const ASSIGN_ROLES: &str = "roles.assign";
}

/// The authenticated user, derived from access token claims.
///
/// A principal is never edited in place; every login or refresh builds a
/// new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    /// Subject identifier.
    pub id: String,
    /// Login name.
    pub user_name: String,
    /// Display name.
    #[serde(default)]
    pub full_name: Option<String>,
    /// Email address.
    #[serde(default)]
    pub email: Option<String>,
    /// Job title.
    #[serde(default)]
    pub job_title: Option<String>,
    /// Phone number.
    #[serde(default)]
    pub phone_number: Option<String>,
    /// Granted roles.
    #[serde(default)]
    pub roles: BTreeSet<String>,
    /// Account enabled flag.
    #[serde(default)]
    pub is_enabled: bool,
}

impl Principal {
    /// Builds an enabled principal from decoded claims.
    pub fn from_claims(claims: &Claims) -> Self {
        Self {
            id: claims.sub.clone().unwrap_or_default(),
            user_name: claims.name.clone().unwrap_or_default(),
            full_name: claims.fullname.clone(),
            email: claims.email.clone(),
            job_title: claims.jobtitle.clone(),
            phone_number: claims.phone_number.clone(),
            roles: claims.role.iter().cloned().collect(),
            is_enabled: true,
        }
    }

    /// Name to show in UI chrome: "<job title> <full name or user name>".
    pub fn friendly_name(&self) -> String {
        let name = match self.full_name.as_deref() {
            Some(full) if !full.is_empty() => full,
            _ => self.user_name.as_str(),
        };
        match self.job_title.as_deref() {
            Some(title) if !title.is_empty() => format!("{title} {name}"),
            _ => name.to_string(),
        }
    }

    /// Checks role membership.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}
