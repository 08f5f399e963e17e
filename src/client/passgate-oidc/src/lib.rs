//! # Passgate OIDC
//!
//! Token endpoint round trips for the resource owner password flow.
//!
//! ## Grants
//!
//! - `password` (user name + password, with the configured scope)
//! - `refresh_token`
//!
//! The token endpoint is taken from configuration or discovered from the
//! issuer's `/.well-known/openid-configuration` document.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod error;
pub mod http;

pub use client::{TokenExchangeClient, TokenResponse};
pub use config::{OidcConfig, DEFAULT_CLIENT_ID, DEFAULT_SCOPE};
pub use error::{ExchangeError, INVALID_GRANT};
pub use http::OidcTokenClient;
