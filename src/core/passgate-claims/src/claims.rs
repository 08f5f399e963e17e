//! Typed view over an access token payload.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Claims carried by an access token.
///
/// `role` and `permission` may be a single string or an array on the wire;
/// both are normalized to a vector here so callers never branch on shape.
/// Claims this struct does not name are kept in [`Claims::extra`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Login name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fullname: Option<String>,

    /// Email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Job title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobtitle: Option<String>,

    /// Phone number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,

    /// Roles granted to the subject.
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub role: Vec<String>,

    /// Permissions granted to the subject, in issuer order.
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub permission: Vec<String>,

    /// Opaque per-user application settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<Value>,

    /// Expiration (Unix seconds).
    #[serde(
        default,
        deserialize_with = "epoch_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub exp: Option<u64>,

    /// Every other claim, untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(value)) => vec![value],
        Some(OneOrMany::Many(values)) => values,
    })
}

// Some issuers emit fractional `exp` values.
fn epoch_seconds<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value.map(|secs| if secs <= 0.0 { 0 } else { secs.floor() as u64 }))
}
