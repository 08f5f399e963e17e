//! Keys under which a session is persisted.

/// Raw access token.
pub const ACCESS_TOKEN: &str = "access_token";

/// Refresh token.
pub const REFRESH_TOKEN: &str = "refresh_token";

/// Absolute access token expiry (Unix seconds).
pub const TOKEN_EXPIRES_IN: &str = "expires_in";

/// Ordered permission list.
pub const USER_PERMISSIONS: &str = "user_permissions";

/// Serialized principal.
pub const CURRENT_USER: &str = "current_user";

/// Tier choice; always kept in the permanent tier.
pub const REMEMBER_ME: &str = "remember_me";

/// The keys making up one session record. Written and deleted together.
pub const SESSION_RECORD_KEYS: [&str; 5] = [
    ACCESS_TOKEN,
    REFRESH_TOKEN,
    TOKEN_EXPIRES_IN,
    USER_PERMISSIONS,
    CURRENT_USER,
];
