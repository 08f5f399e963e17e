//! # Passgate Claims
//!
//! Decodes the payload segment of a compact JWT into a typed claims map.
//!
//! ## Trust model
//!
//! Tokens reaching this crate were issued over TLS by the identity provider
//! the client just authenticated against. The signature is **not** checked
//! here; the payload is only parsed so the client can learn who it is and
//! when the access token expires.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod claims;
pub mod decoder;
pub mod error;

pub use claims::Claims;
pub use decoder::{
    decode, decode_value, expiration_of, is_expired, is_expired_at, unix_now, url_base64_decode,
};
pub use error::ClaimsError;
